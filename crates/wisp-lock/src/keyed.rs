//! Keyed async lock
//!
//! TigerStyle: Bounded pool, FIFO hand-off, no unlocked window between
//! waiters, cancellation never leaks a held lock.
//!
//! One [`KeyedLock`] serves any number of string keys. Entries are created
//! on first contention for a key and retired to a bounded free pool once
//! the last interested caller is gone, so steady-state traffic over a hot
//! key set allocates nothing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use wisp_core::constants::LOCK_POOL_SIZE_MAX;
use wisp_core::error::{Error, Result};

// =============================================================================
// KeyedLock
// =============================================================================

/// Keyed, cancellable, FIFO async lock
///
/// Cheap to clone; all clones share one table. Acquisition grants the lock
/// synchronously when the key is uncontended, otherwise the caller joins a
/// FIFO queue and is handed the lock directly by the releasing holder.
#[derive(Clone, Default)]
pub struct KeyedLock {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    table: Mutex<Table>,
    waiter_seq: AtomicU64,
}

#[derive(Default)]
struct Table {
    /// Live entries, one per key with at least one interested caller
    entries: HashMap<String, TableSlot>,
    /// Retired entries kept for reuse, capped at LOCK_POOL_SIZE_MAX
    pool: Vec<Arc<Entry>>,
}

struct TableSlot {
    entry: Arc<Entry>,
    /// Holders plus waiters interested in this key
    refs: usize,
}

#[derive(Default)]
struct Entry {
    queue: Mutex<EntryState>,
}

#[derive(Default)]
struct EntryState {
    held: bool,
    waiters: VecDeque<Waiter>,
}

struct Waiter {
    seq: u64,
    grant_tx: oneshot::Sender<()>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl KeyedLock {
    /// Create a new lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`
    ///
    /// Returns a guard that releases on drop. If the key is held, waits in
    /// FIFO order. Cancellation while waiting returns [`Error::Cancelled`];
    /// an already-cancelled token still succeeds when the key is free.
    pub async fn acquire(&self, key: &str, cancel: &CancellationToken) -> Result<KeyedGuard> {
        debug_assert!(!key.is_empty(), "lock key must not be empty");

        let entry = self.shared.checkout(key);

        let waiting = {
            let mut state = locked(&entry.queue);
            if !state.held {
                state.held = true;
                None
            } else {
                let seq = self.shared.waiter_seq.fetch_add(1, Ordering::Relaxed);
                let (grant_tx, grant_rx) = oneshot::channel();
                state.waiters.push_back(Waiter { seq, grant_tx });
                Some((seq, grant_rx))
            }
        };

        let Some((seq, mut grant_rx)) = waiting else {
            return Ok(KeyedGuard {
                shared: Arc::clone(&self.shared),
                key: key.to_string(),
                entry,
            });
        };

        trace!(key, seq, "keyed lock contended, waiting");

        tokio::select! {
            biased;
            granted = &mut grant_rx => {
                match granted {
                    Ok(()) => Ok(KeyedGuard {
                        shared: Arc::clone(&self.shared),
                        key: key.to_string(),
                        entry,
                    }),
                    // The sender is only dropped without sending if the
                    // entry state was torn down underneath us.
                    Err(_) => Err(Error::lock_misuse(format!(
                        "grant channel closed for key '{}'",
                        key
                    ))),
                }
            }
            _ = cancel.cancelled() => {
                let was_waiting = {
                    let mut state = locked(&entry.queue);
                    let before = state.waiters.len();
                    state.waiters.retain(|w| w.seq != seq);
                    state.waiters.len() < before
                };
                if was_waiting {
                    self.shared.unref(key, &entry);
                } else {
                    // The grant landed before we retracted. Hand the lock
                    // to the next waiter on our behalf.
                    self.shared.release(key, &entry);
                }
                trace!(key, seq, was_waiting, "keyed lock wait cancelled");
                Err(Error::Cancelled)
            }
        }
    }

    /// Run `operation` while holding the lock for `key`
    pub async fn run_locked<F, T>(
        &self,
        key: &str,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T>
    where
        F: std::future::Future<Output = T>,
    {
        let _guard = self.acquire(key, cancel).await?;
        Ok(operation.await)
    }
}

impl Shared {
    /// Register interest in `key`, creating or reusing an entry
    fn checkout(&self, key: &str) -> Arc<Entry> {
        let mut table = locked(&self.table);
        if let Some(slot) = table.entries.get_mut(key) {
            slot.refs += 1;
            return Arc::clone(&slot.entry);
        }

        let entry = table.pool.pop().unwrap_or_default();
        table.entries.insert(
            key.to_string(),
            TableSlot {
                entry: Arc::clone(&entry),
                refs: 1,
            },
        );
        entry
    }

    /// Release a held lock: hand off to the next live waiter, or unlock
    ///
    /// Pops abandoned waiters (receiver dropped without retracting) and
    /// drops their interest as well as the releasing holder's.
    fn release(&self, key: &str, entry: &Arc<Entry>) {
        let abandoned = {
            let mut state = locked(&entry.queue);
            debug_assert!(state.held, "release of a lock that is not held");

            let mut abandoned: usize = 0;
            loop {
                match state.waiters.pop_front() {
                    Some(waiter) => {
                        // Sending under the entry mutex keeps pop+grant
                        // atomic with respect to waiter retraction.
                        if waiter.grant_tx.send(()).is_ok() {
                            break;
                        }
                        abandoned += 1;
                    }
                    None => {
                        state.held = false;
                        break;
                    }
                }
            }
            abandoned
        };

        for _ in 0..abandoned {
            self.unref(key, entry);
        }
        self.unref(key, entry);
    }

    /// Drop one registered interest in `key`; retire the entry at zero
    fn unref(&self, key: &str, entry: &Arc<Entry>) {
        let mut table = locked(&self.table);
        let Some(slot) = table.entries.get_mut(key) else {
            debug_assert!(false, "unref of unknown key");
            return;
        };
        if !Arc::ptr_eq(&slot.entry, entry) {
            debug_assert!(false, "unref against a reused key");
            return;
        }

        debug_assert!(slot.refs > 0, "interest count underflow");
        slot.refs -= 1;
        if slot.refs > 0 {
            return;
        }

        table.entries.remove(key);
        {
            let mut state = locked(&entry.queue);
            debug_assert!(!state.held, "retiring a held entry");
            debug_assert!(state.waiters.is_empty(), "retiring an entry with waiters");
            state.held = false;
            state.waiters.clear();
        }
        if table.pool.len() < LOCK_POOL_SIZE_MAX {
            table.pool.push(Arc::clone(entry));
        }
    }
}

// =============================================================================
// KeyedGuard
// =============================================================================

/// Exclusive hold on one key, released on drop
///
/// Dropping the guard hands the lock to the next FIFO waiter without an
/// unlocked window in between.
pub struct KeyedGuard {
    shared: Arc<Shared>,
    key: String,
    entry: Arc<Entry>,
}

impl KeyedGuard {
    /// Get the key this guard holds
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.shared.release(&self.key, &self.entry);
    }
}

impl std::fmt::Debug for KeyedGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedGuard").field("key", &self.key).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry_count(lock: &KeyedLock) -> usize {
        locked(&lock.shared.table).entries.len()
    }

    fn pool_count(lock: &KeyedLock) -> usize {
        locked(&lock.shared.table).pool.len()
    }

    #[tokio::test]
    async fn test_uncontended_acquire_is_immediate() {
        let lock = KeyedLock::new();
        let cancel = CancellationToken::new();

        let guard = lock.acquire("k", &cancel).await.unwrap();
        assert_eq!(guard.key(), "k");
        assert_eq!(entry_count(&lock), 1);

        drop(guard);
        assert_eq!(entry_count(&lock), 0);
        assert_eq!(pool_count(&lock), 1);
    }

    #[tokio::test]
    async fn test_pool_reuses_retired_entries() {
        let lock = KeyedLock::new();
        let cancel = CancellationToken::new();

        for _ in 0..10 {
            let guard = lock.acquire("k", &cancel).await.unwrap();
            drop(guard);
        }
        // One entry cycles through the pool instead of growing it.
        assert_eq!(pool_count(&lock), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_are_independent() {
        let lock = KeyedLock::new();
        let cancel = CancellationToken::new();

        let guard_a = lock.acquire("a", &cancel).await.unwrap();
        let guard_b = lock.acquire("b", &cancel).await.unwrap();
        assert_eq!(entry_count(&lock), 2);

        drop(guard_a);
        drop(guard_b);
        assert_eq!(entry_count(&lock), 0);
    }

    #[tokio::test]
    async fn test_waiters_are_granted_in_fifo_order() {
        let lock = KeyedLock::new();
        let cancel = CancellationToken::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = lock.acquire("k", &cancel).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0usize..3 {
            let task_lock = lock.clone();
            let cancel = cancel.clone();
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let _guard = task_lock.acquire("k", &cancel).await.unwrap();
                locked(&order).push(i);
            }));
            // Let each task enqueue before spawning the next.
            while locked(&lock.shared.table)
                .entries
                .get("k")
                .map(|slot| slot.refs)
                .unwrap_or(0)
                < i + 2
            {
                tokio::task::yield_now().await;
            }
        }

        drop(guard);
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*locked(&order), vec![0, 1, 2]);
        assert_eq!(entry_count(&lock), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_leak_the_lock() {
        let lock = KeyedLock::new();
        let cancel = CancellationToken::new();

        let guard = lock.acquire("k", &cancel).await.unwrap();

        let waiter_cancel = CancellationToken::new();
        let waiter = {
            let lock = lock.clone();
            let waiter_cancel = waiter_cancel.clone();
            tokio::spawn(async move { lock.acquire("k", &waiter_cancel).await })
        };
        while locked(&lock.shared.table)
            .entries
            .get("k")
            .map(|slot| slot.refs)
            .unwrap_or(0)
            < 2
        {
            tokio::task::yield_now().await;
        }

        waiter_cancel.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));

        // Holder is unaffected; a later acquire still works.
        drop(guard);
        let guard = lock.acquire("k", &cancel).await.unwrap();
        drop(guard);
        assert_eq!(entry_count(&lock), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_succeeds_when_free() {
        let lock = KeyedLock::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Cancellation is only observed while waiting.
        let guard = lock.acquire("k", &cancel).await.unwrap();
        drop(guard);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_skipped_on_release() {
        let lock = KeyedLock::new();
        let cancel = CancellationToken::new();

        let guard = lock.acquire("k", &cancel).await.unwrap();

        // A waiter whose future is dropped mid-wait (timeout) leaves a dead
        // queue slot that release must skip over.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            lock.acquire("k", &CancellationToken::new()),
        )
        .await;
        assert!(abandoned.is_err());

        drop(guard);
        let guard = lock.acquire("k", &cancel).await.unwrap();
        drop(guard);
        assert_eq!(entry_count(&lock), 0);
    }

    #[tokio::test]
    async fn test_run_locked_releases_after_operation() {
        let lock = KeyedLock::new();
        let cancel = CancellationToken::new();

        let value = lock.run_locked("k", &cancel, async { 7 }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(entry_count(&lock), 0);
    }

    #[tokio::test]
    async fn test_mutual_exclusion_under_contention() {
        let lock = KeyedLock::new();
        let cancel = CancellationToken::new();
        let in_turn = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let turns = Arc::new(std::sync::atomic::AtomicU64::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let cancel = cancel.clone();
            let in_turn = Arc::clone(&in_turn);
            let turns = Arc::clone(&turns);
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    let _guard = lock.acquire("hot", &cancel).await.unwrap();
                    assert!(!in_turn.swap(true, Ordering::SeqCst), "overlapping turns");
                    tokio::task::yield_now().await;
                    in_turn.store(false, Ordering::SeqCst);
                    turns.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(turns.load(Ordering::SeqCst), 8 * 25);
        assert_eq!(entry_count(&lock), 0);
    }
}
