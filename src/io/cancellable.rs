use crate::error::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag checked by blocking I/O between attempts.
#[derive(Clone, Default, Debug)]
pub struct Cancellable {
    cancelled: Arc<AtomicBool>,
}

impl Cancellable {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every operation watching this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Make the token usable again.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    /// `Err(Error::Cancelled)` once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let a = Cancellable::new();
        let b = a.clone();
        assert!(a.check().is_ok());
        b.cancel();
        assert!(matches!(a.check(), Err(Error::Cancelled)));
        a.reset();
        assert!(!b.is_cancelled());
    }
}
