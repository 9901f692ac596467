use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{AnalysisError, AnalysisResult};

/// Cooperative cancellation flag shared between the coordinator and its workers.
///
/// A token is one-shot: once cancelled it stays cancelled. The coordinator
/// hands out a fresh token after every cancellation, so work started later is
/// never affected by an earlier abort.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Returns `Err(Cancelled)` once the token has been cancelled.
    pub fn check(&self) -> AnalysisResult<()> {
        if self.is_cancelled() {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// True when both handles observe the same flag.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let worker = token.clone();
        assert!(worker.check().is_ok());
        token.cancel();
        assert_eq!(worker.check(), Err(AnalysisError::Cancelled));
        assert!(worker.same_as(&token));
    }

    #[test]
    fn fresh_token_is_unaffected() {
        let old = CancelToken::new();
        old.cancel();
        let fresh = CancelToken::new();
        assert!(!fresh.is_cancelled());
        assert!(!fresh.same_as(&old));
    }
}
