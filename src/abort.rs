//! Per-exchange abort coordination.
//!
//! Each exchange owns one [`AbortFlag`]: a monotonic, set-at-most-once
//! cancellation signal shared between the inbound assembler, the outbound
//! writer, and the transport glue. Cancellation is cooperative: the flag
//! is observed at suspension points (chunk boundaries, writable
//! notifications), never mid-operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Shared cancellation flag for one exchange.
///
/// Cheaply cloneable; all clones observe the same flag. Once set, the flag
/// never resets.
#[derive(Clone, Default)]
pub struct AbortFlag {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortFlag {
    /// Create a new, unset abort flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake any task waiting in [`aborted`](Self::aborted).
    ///
    /// Idempotent: only the first call has an effect.
    pub fn set(&self) {
        if !self.inner.aborted.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Check whether the flag has been set.
    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Wait until the flag is set.
    ///
    /// Resolves immediately if the flag is already set. Intended for
    /// `select!` arms at suspension points.
    pub async fn aborted(&self) {
        // Register interest before the final check so a concurrent set()
        // cannot slip between check and wait.
        loop {
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for AbortFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortFlag")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
