//! Cooperative cancellation for graph walks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cloneable flag a caller flips to stop a walk early.
///
/// Nodes that are already running are allowed to finish; the walker simply
/// stops starting new ones once it observes the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    canceled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not canceled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the token can stop another walk.
    pub fn reset(&self) {
        self.canceled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_canceled());

        token.cancel();
        assert!(other.is_canceled());

        other.reset();
        assert!(!token.is_canceled());
    }
}
