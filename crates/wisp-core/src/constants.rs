//! TigerStyle constants for Wisp
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Actor Limits
// =============================================================================

/// Maximum length of an actor id in bytes
pub const ACTOR_ID_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of an actor type name in bytes
pub const ACTOR_NAME_LENGTH_BYTES_MAX: usize = 128;

/// Maximum number of live activation records per actor type
pub const ACTOR_CONCURRENT_COUNT_MAX: usize = 1_000_000;

// =============================================================================
// Sweep Limits
// =============================================================================

/// Default sweep period in milliseconds (1 min)
pub const SWEEP_PERIOD_MS_DEFAULT: u64 = 60 * 1000;

/// Minimum sweep period in milliseconds
///
/// Shorter periods are only useful in tests, which drive sweeps directly.
pub const SWEEP_PERIOD_MS_MIN: u64 = 1;

/// Default number of idle sweeps an actor survives before collection
pub const IDLE_SWEEPS_COUNT_DEFAULT: u32 = 1;

// =============================================================================
// Keyed Lock Limits
// =============================================================================

/// Maximum number of retired lock entries kept for reuse
pub const LOCK_POOL_SIZE_MAX: usize = 16;

// Compile-time assertions for constant validity
const _: () = {
    assert!(ACTOR_ID_LENGTH_BYTES_MAX >= 64);
    assert!(ACTOR_NAME_LENGTH_BYTES_MAX >= 32);
    assert!(SWEEP_PERIOD_MS_DEFAULT >= SWEEP_PERIOD_MS_MIN);
    assert!(LOCK_POOL_SIZE_MAX > 0);
};
