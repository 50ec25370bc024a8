//! Wisp Lock
//!
//! Keyed, cancellable, pooled async lock used to serialize actor turns.
//!
//! # TigerStyle
//!
//! - FIFO grant order, hand-off without an unlocked window
//! - Bounded free pool (`LOCK_POOL_SIZE_MAX`)
//! - Cancellation never leaks a held lock

pub mod keyed;

pub use keyed::{KeyedGuard, KeyedLock};
