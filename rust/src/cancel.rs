//! Cooperative cancellation for long-running stages.
//!
//! The caller holds a clone of the token and flips it; the ensemble checks it
//! between draws and the curve engine between iterations. Work already done
//! is kept and returned with a cancelled status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Stop flag polled by the ensemble before each draw and by the curve engine
/// before each refit iteration.
///
/// Clones share one flag, so a caller can keep a clone and flip it from
/// another thread while the pipeline holds a reference.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    requested: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask running stages to stop at their next draw or iteration boundary.
    pub fn cancel(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }
}

/// Whether a stage ran to completion or stopped on a cancellation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Cancelled,
}

impl RunStatus {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunStatus::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cloned_token_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let token = CancellationToken::new();
        let remote = token.clone();
        std::thread::spawn(move || remote.cancel()).join().unwrap();
        assert!(token.is_cancelled());
        assert!(RunStatus::Cancelled.is_cancelled());
        assert!(!RunStatus::Complete.is_cancelled());
    }
}
