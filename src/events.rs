//! Event surface between the pipeline threads and the outer event loop.

use std::sync::mpsc;

/// Events posted by pipeline workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A new decoded frame is pending in the video buffer.
    NewFrame,

    /// The stream worker terminated, for any reason.
    StreamStopped,
}

/// Cloneable posting half of the event queue.
///
/// Posting never fails from the worker's point of view: if the receiving
/// side is gone the pipeline is already shutting down.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<PipelineEvent>,
}

impl EventQueue {
    pub fn post(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Create the event queue and the receiver the main loop blocks on.
pub fn event_channel() -> (EventQueue, mpsc::Receiver<PipelineEvent>) {
    let (tx, rx) = mpsc::channel();
    (EventQueue { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_and_receive() {
        let (queue, rx) = event_channel();
        queue.post(PipelineEvent::StreamStopped);
        assert_eq!(rx.recv().unwrap(), PipelineEvent::StreamStopped);
    }

    #[test]
    fn test_post_without_receiver_does_not_panic() {
        let (queue, rx) = event_channel();
        drop(rx);
        queue.post(PipelineEvent::StreamStopped);
    }
}
