//! Caller-supplied cancellation for long decodes.
//!
//! The walkers check the token between records, never mid-record, so the
//! latency past a fired deadline is bounded by one record's size.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    fired: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that fires once `deadline` passes.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// Fire the token. All clones observe the cancellation.
    pub fn cancel(&self) {
        self.fired.store(true, Ordering::Relaxed);
    }

    pub fn cancelled(&self) -> bool {
        if self.fired.load(Ordering::Relaxed) {
            return true;
        }
        match self.deadline {
            Some(d) => Instant::now() >= d,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fires_on_cancel() {
        let t = CancelToken::new();
        let clone = t.clone();
        assert!(!clone.cancelled());
        t.cancel();
        assert!(clone.cancelled());
    }

    #[test]
    fn fires_on_deadline() {
        let t = CancelToken::with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(t.cancelled());
    }
}
