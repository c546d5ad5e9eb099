//! Triple-buffered latest-frame hand-off between decoder and renderer.
//!
//! The buffer maintains three frame slots:
//! - **Producer slot**: currently being written by the decoder thread
//! - **Pending slot**: most recently offered frame, awaiting the consumer
//! - **Consumer slot**: currently being read by the renderer
//!
//! Offering swaps producer and pending; taking swaps consumer and
//! pending. The producer may offer faster than the consumer takes;
//! intermediate frames are dropped without queueing, and the consumer is
//! guaranteed to see the latest offered frame at each take. Memory is
//! constant: slot swaps exchange indices, never pixel data.
//!
//! # Safety
//!
//! Slot contents live in `UnsafeCell`s so frame writes and reads happen
//! without holding the lock; only the index/flag state is mutex-guarded.
//! Soundness rests on the single-producer/single-consumer contract:
//!
//! 1. At any time each slot is designated by exactly one index.
//! 2. The producer index only changes on `offer`, called by the producer
//!    thread while no producer guard is live.
//! 3. The consumer index only changes on `take_frame`, called by the
//!    consumer thread after the previous guard is dropped.
//! 4. The pending slot is never lent out; it changes hands under the
//!    mutex.

use std::cell::UnsafeCell;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, OnceLock};

use super::VideoFrame;
use crate::utils::SignalOfStop;

/// Consumer-side notifications, invoked on the producer thread after each
/// offer, outside the buffer lock.
pub trait FrameListener: Send + Sync {
    /// A new frame is pending and no previous one was lost.
    fn on_frame_available(&self);

    /// The previous pending frame was dropped unconsumed.
    fn on_frame_skipped(&self) {}
}

struct SlotState {
    producer: usize,
    pending: usize,
    consumer: usize,
    /// True when the pending slot holds nothing the consumer still needs;
    /// starts true since there is initially no frame.
    pending_consumed: bool,
}

pub struct VideoBuffer {
    slots: [UnsafeCell<VideoFrame>; 3],
    state: Mutex<SlotState>,
    listener: OnceLock<Box<dyn FrameListener>>,
    interrupt: SignalOfStop,
}

// Safety: slot contents are only ever accessed by the thread currently
// designated by the corresponding index (see module docs).
unsafe impl Send for VideoBuffer {}
unsafe impl Sync for VideoBuffer {}

impl VideoBuffer {
    pub fn new() -> Self {
        Self {
            slots: [
                UnsafeCell::new(VideoFrame::new()),
                UnsafeCell::new(VideoFrame::new()),
                UnsafeCell::new(VideoFrame::new()),
            ],
            state: Mutex::new(SlotState {
                producer: 0,
                pending: 1,
                consumer: 2,
                pending_consumed: true,
            }),
            listener: OnceLock::new(),
            interrupt: SignalOfStop::new(),
        }
    }

    /// Register the consumer callbacks. Must be called exactly once,
    /// before the first offer.
    pub fn set_listener(&self, listener: Box<dyn FrameListener>) {
        assert!(
            self.listener.set(listener).is_ok(),
            "frame listener must be set only once"
        );
    }

    /// Borrow the producer slot for writing the next frame. Producer
    /// thread only; the previous guard must be consumed or dropped first.
    pub fn producer_frame(&self) -> ProducerFrame<'_> {
        let idx = self.state.lock().unwrap().producer;
        ProducerFrame { buffer: self, idx }
    }

    /// True when a pending frame awaits the consumer.
    pub fn has_frame(&self) -> bool {
        !self.state.lock().unwrap().pending_consumed
    }

    /// Take the latest offered frame. Consumer thread only; panics if no
    /// frame is pending. The returned guard stays valid until the next
    /// take and must be dropped before it.
    pub fn take_frame(&self) -> ConsumerFrame<'_> {
        let idx = {
            let mut state = self.state.lock().unwrap();
            assert!(!state.pending_consumed, "no pending frame to take");
            state.pending_consumed = true;

            let (consumer, pending) = (state.consumer, state.pending);
            state.consumer = pending;
            state.pending = consumer;

            // The new pending slot holds the previously consumed frame;
            // release its payload while it is owned by nobody.
            // SAFETY: neither index designates this slot for lending and
            // the previous consumer guard is gone per the take contract.
            unsafe { (*self.slots[state.pending].get()).clear() };

            state.consumer
        };

        ConsumerFrame { buffer: self, idx }
    }

    /// Unblock consumer implementations that sleep waiting for frames.
    /// The callback-driven consumer path never blocks, so this only
    /// cancels the stop signal blocking consumers may observe.
    pub fn interrupt(&self) {
        self.interrupt.cancel();
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.cancelled()
    }

    /// Handle to the buffer's stop signal. The decoder sink exposes this
    /// as its interrupt capability, and blocking consumers may park on
    /// it via `wait_cancellation`.
    pub fn interrupt_signal(&self) -> SignalOfStop {
        self.interrupt.clone()
    }

    fn offer_from_producer(&self) {
        let listener = self
            .listener
            .get()
            .expect("frame listener must be set before the first offer");

        let skipped = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;

            // Drop whatever the pending slot still holds; if it was never
            // consumed this is the frame skip.
            // SAFETY: the pending slot is lent to no one.
            unsafe { (*self.slots[state.pending].get()).clear() };

            mem::swap(&mut state.producer, &mut state.pending);

            let skipped = !state.pending_consumed;
            state.pending_consumed = false;
            skipped
        };

        if skipped {
            listener.on_frame_skipped();
        } else {
            listener.on_frame_available();
        }
    }
}

impl Default for VideoBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Write access to the producer slot; `offer` publishes the frame.
pub struct ProducerFrame<'a> {
    buffer: &'a VideoBuffer,
    idx: usize,
}

impl ProducerFrame<'_> {
    /// Publish the written frame, swapping it into the pending slot and
    /// firing the consumer callback.
    pub fn offer(self) {
        self.buffer.offer_from_producer();
    }
}

impl Deref for ProducerFrame<'_> {
    type Target = VideoFrame;

    fn deref(&self) -> &VideoFrame {
        // SAFETY: the producer index cannot change while this guard
        // exists (only `offer` changes it, which consumes the guard).
        unsafe { &*self.buffer.slots[self.idx].get() }
    }
}

impl DerefMut for ProducerFrame<'_> {
    fn deref_mut(&mut self) -> &mut VideoFrame {
        // SAFETY: as above; the producer slot is exclusive to this guard.
        unsafe { &mut *self.buffer.slots[self.idx].get() }
    }
}

/// Read access to the consumer slot, valid until the next take.
pub struct ConsumerFrame<'a> {
    buffer: &'a VideoBuffer,
    idx: usize,
}

impl Deref for ConsumerFrame<'_> {
    type Target = VideoFrame;

    fn deref(&self) -> &VideoFrame {
        // SAFETY: the consumer index cannot change while this guard
        // exists per the single-consumer take contract.
        unsafe { &*self.buffer.slots[self.idx].get() }
    }
}
