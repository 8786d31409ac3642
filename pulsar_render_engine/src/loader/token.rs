/// Sync tokens and the completion watermark
///
/// A token identifies "all uploads queued up to this point". Tokens are
/// issued per flushed batch from a monotonically increasing counter; a
/// token is complete once the worker has confirmed device-side completion
/// of its batch and advanced the shared watermark past it.

use std::sync::atomic::{AtomicU64, Ordering};

/// Completion token for a batch of queued uploads
///
/// Obtained from the `*_with_token` loader calls or from `flush`. Compare
/// with `ResourceLoader::is_token_completed` / `wait_token_completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SyncToken(pub(crate) u64);

impl SyncToken {
    /// Token representing work that finished inline; always complete
    pub const COMPLETE: SyncToken = SyncToken(0);

    /// Raw counter value (0 = already complete)
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Shared "last completed token" watermark
///
/// Written only by the loader's worker thread; readable lock-free from any
/// thread, so polling completion never contends on the queue mutex.
pub(crate) struct CompletionTracker {
    last_completed: AtomicU64,
}

impl CompletionTracker {
    pub(crate) fn new() -> Self {
        Self {
            last_completed: AtomicU64::new(0),
        }
    }

    /// Whether `token` has completed
    pub(crate) fn is_completed(&self, token: SyncToken) -> bool {
        self.last_completed.load(Ordering::Acquire) >= token.0
    }

    /// Last completed token
    pub(crate) fn last_completed(&self) -> SyncToken {
        SyncToken(self.last_completed.load(Ordering::Acquire))
    }

    /// Advance the watermark to `token`
    ///
    /// Tokens complete in issuance order; the watermark never moves
    /// backwards.
    pub(crate) fn advance(&self, token: SyncToken) {
        debug_assert!(self.last_completed.load(Ordering::Acquire) < token.0,
            "completion watermark moving backwards");
        self.last_completed.store(token.0, Ordering::Release);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
