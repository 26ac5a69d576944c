//! The activation interface between the orchestrator and a render host.

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Cancellation flag shared between a generation cycle and its target.
///
/// A target commits a program only while holding the guard returned by
/// [`CancelToken::hold`]. [`CancelToken::cancel`] waits for such a commit to
/// finish, so once `cancel` has returned no further commit can happen.
///
/// Do not call `cancel` on a thread that currently holds the guard.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<Mutex<bool>>,
}

/// Proof that the owning cycle was still live when the commit started
#[must_use]
pub struct CommitGuard<'a> {
    _lock: MutexGuard<'a, bool>,
}

impl CancelToken {
    /// A live token
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel; blocks while a commit is in progress
    pub fn cancel(&self) {
        *self.cancelled.lock() = true;
    }

    /// True after [`cancel`](Self::cancel)
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Enter the commit section, or `None` if already cancelled
    pub fn hold(&self) -> Option<CommitGuard<'_>> {
        let lock = self.cancelled.lock();
        if *lock {
            None
        } else {
            Some(CommitGuard { _lock: lock })
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Something that can try to run a candidate program and fall back.
///
/// Activation is a plain boolean outcome: candidates are untrusted generated
/// text and failing to compile is an ordinary result, not an error.
#[async_trait]
pub trait ProgramTarget: Send + Sync {
    /// Try to make `code` the running program. On `false` the previously
    /// running program must still be running.
    async fn try_activate(&self, code: &str) -> bool;

    /// Re-activate the last program that activated successfully, or the
    /// built-in default when there is none.
    async fn rollback(&self) -> bool;

    /// [`try_activate`](Self::try_activate) on behalf of a cancellable cycle.
    ///
    /// Implementations should commit under [`CancelToken::hold`]. The default
    /// only checks the token before activating.
    async fn try_activate_guarded(&self, code: &str, token: &CancelToken) -> bool {
        if token.is_cancelled() {
            return false;
        }
        self.try_activate(code).await
    }

    /// [`rollback`](Self::rollback) on behalf of a cancellable cycle
    async fn rollback_guarded(&self, token: &CancelToken) -> bool {
        if token.is_cancelled() {
            return false;
        }
        self.rollback().await
    }
}
