use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Cooperative stop signal shared between pipeline threads.
///
/// `cancel()` is idempotent and callable from any thread. Threads that
/// block (for example a renderer waiting for shutdown) park on
/// `wait_cancellation()`; everything else polls `cancelled()`.
#[derive(Debug, Default)]
pub struct SignalOfStop {
    shared: Arc<SharedState>,
}

#[derive(Debug, Default)]
struct SharedState {
    closing: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl SignalOfStop {
    pub fn new() -> SignalOfStop {
        SignalOfStop::default()
    }

    pub fn cancel(&self) {
        self.shared.closing.store(true, Ordering::Relaxed);

        // Take the lock so a waiter between its flag check and its
        // condvar wait cannot miss the wakeup.
        let _guard = self.shared.mutex.lock().unwrap();
        self.shared.condvar.notify_all();
    }

    pub fn cancelled(&self) -> bool {
        self.shared.closing.load(Ordering::Relaxed)
    }

    /// Block the calling thread until `cancel()` is invoked.
    pub fn wait_cancellation(&self) {
        let mut guard = self.shared.mutex.lock().unwrap();

        while !self.cancelled() {
            guard = self.shared.condvar.wait(guard).unwrap();
        }
    }
}

impl Clone for SignalOfStop {
    fn clone(&self) -> SignalOfStop {
        SignalOfStop {
            shared: Arc::clone(&self.shared),
        }
    }
}
