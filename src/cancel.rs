//! Cooperative cancellation flag shared between the task manager and the
//! worker that owns a task.
//!
//! `cancel()` only sets the flag; the owning worker observes it at the next
//! chunk or reduction boundary and performs the state transition itself.
//! In-flight provider calls are never aborted — they finish and their
//! output is discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable cancellation flag. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        assert!(!CancelFlag::new().is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let flag = CancelFlag::new();
        let seen_by_worker = flag.clone();
        flag.cancel();
        assert!(seen_by_worker.is_cancelled());
    }
}
