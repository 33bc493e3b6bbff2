//! Process-wide interrupt signal.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// Single-fire shutdown trigger.
///
/// Armed at construction, fires at most once. Waiters that arrive after the
/// trigger complete immediately.
#[derive(Debug)]
pub struct Shutdown {
    token: CancellationToken,
    fired: AtomicBool,
}

impl Shutdown {
    /// Create a new, armed shutdown signal.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            fired: AtomicBool::new(false),
        }
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn trigger(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Wait until the signal fires.
    pub async fn wait(&self) {
        self.token.cancelled().await
    }

    /// A token that is cancelled when the signal fires.
    pub fn subscribe(&self) -> CancellationToken {
        self.token.child_token()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
