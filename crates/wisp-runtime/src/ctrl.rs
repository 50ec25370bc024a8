//! Control locking for actor lifecycle operations
//!
//! TigerStyle: Trait seam at the lock so a different serialization scheme
//! (e.g. one backed by an external store) can be substituted without
//! touching the lifecycle code.

use async_trait::async_trait;
use std::any::Any;
use tokio_util::sync::CancellationToken;

use wisp_core::error::Result;
use wisp_core::identity::ActorIdentity;
use wisp_lock::KeyedLock;

// =============================================================================
// ControlToken
// =============================================================================

/// Opaque proof of a held control lock
///
/// Produced by [`ControlLock::acquire`] and consumed exactly once by
/// [`ControlLock::release`]. Implementations stash whatever they need to
/// release in here.
pub struct ControlToken(Box<dyn Any + Send>);

impl ControlToken {
    /// Wrap implementation state in a token
    pub fn new(inner: impl Any + Send) -> Self {
        Self(Box::new(inner))
    }

    /// Recover the implementation state
    pub fn downcast<T: Any>(self) -> Option<Box<T>> {
        self.0.downcast().ok()
    }
}

impl std::fmt::Debug for ControlToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlToken").finish_non_exhaustive()
    }
}

// =============================================================================
// ControlLock
// =============================================================================

/// Serializes lifecycle operations per actor identity
///
/// Exactly one turn, load, or unload runs under the lock for a given
/// identity at a time.
#[async_trait]
pub trait ControlLock: Send + Sync {
    /// Acquire the lock for `identity`
    async fn acquire(
        &self,
        identity: &ActorIdentity,
        cancel: &CancellationToken,
    ) -> Result<ControlToken>;

    /// Release a previously acquired lock
    async fn release(&self, token: ControlToken);
}

// =============================================================================
// KeyedControlLock
// =============================================================================

/// Default in-process control lock over a [`KeyedLock`]
///
/// The key carries a reserved prefix so application users of the same
/// keyed lock cannot collide with lifecycle serialization.
#[derive(Clone, Default)]
pub struct KeyedControlLock {
    lock: KeyedLock,
}

impl KeyedControlLock {
    /// Create a control lock with its own lock table
    pub fn new() -> Self {
        Self::default()
    }

    fn control_key(identity: &ActorIdentity) -> String {
        format!("wisp:ctrl:{}", identity)
    }
}

#[async_trait]
impl ControlLock for KeyedControlLock {
    async fn acquire(
        &self,
        identity: &ActorIdentity,
        cancel: &CancellationToken,
    ) -> Result<ControlToken> {
        let guard = self.lock.acquire(&Self::control_key(identity), cancel).await?;
        Ok(ControlToken::new(guard))
    }

    async fn release(&self, token: ControlToken) {
        // The keyed guard releases on drop.
        drop(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn identity() -> ActorIdentity {
        ActorIdentity::new("1", "Echo").unwrap()
    }

    #[tokio::test]
    async fn test_keyed_control_lock_serializes_identity() {
        let ctrl = Arc::new(KeyedControlLock::new());
        let cancel = CancellationToken::new();
        let held = Arc::new(AtomicBool::new(false));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let ctrl = Arc::clone(&ctrl);
            let cancel = cancel.clone();
            let held = Arc::clone(&held);
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    let token = ctrl.acquire(&identity(), &cancel).await.unwrap();
                    assert!(!held.swap(true, Ordering::SeqCst));
                    tokio::task::yield_now().await;
                    held.store(false, Ordering::SeqCst);
                    ctrl.release(token).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_control_token_downcast() {
        let token = ControlToken::new(42u32);
        assert_eq!(token.downcast::<u32>().map(|n| *n), Some(42));
    }

    #[tokio::test]
    async fn test_cancelled_waiter_gets_error() {
        let ctrl = KeyedControlLock::new();
        let cancel = CancellationToken::new();

        let token = ctrl.acquire(&identity(), &cancel).await.unwrap();

        let waiter_cancel = CancellationToken::new();
        waiter_cancel.cancel();
        // A pre-cancelled token only fails once the lock is contended.
        let result = ctrl.acquire(&identity(), &waiter_cancel).await;
        assert!(result.is_err());

        ctrl.release(token).await;
    }
}
