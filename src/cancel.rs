//! Cooperative cancellation for long reconciliations.
//!
//! The engine checks the token between tree-zip visits; on cancel the
//! active transaction is dropped and no refs move.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, ensure};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Bails out of the current operation if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        ensure!(!self.is_cancelled(), "Cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trips_once_cancelled() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());

        let shared = token.clone();
        shared.cancel();
        assert!(token.check().is_err());
    }
}
