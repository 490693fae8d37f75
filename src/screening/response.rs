// ResponseSignal: the operator's "heard" latch

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable latch raised by the response button and consumed by protocols
#[derive(Debug, Clone, Default)]
pub struct ResponseSignal {
    raised: Arc<AtomicBool>,
}

impl ResponseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Read and reset in one step
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::SeqCst)
    }
}
