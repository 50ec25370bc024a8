//! Per-type actor policy
//!
//! TigerStyle: Explicit enum variants instead of integer sentinels.

use crate::actor::Actor;
use crate::error::{Error, Result};
use crate::identity::ActorIdentity;
use serde::{Deserialize, Serialize};
use std::any::TypeId;

// =============================================================================
// MaxIdle
// =============================================================================

/// How many consecutive idle sweeps an actor survives before collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxIdle {
    /// Never collected by the idle sweep (explicit unload only)
    Unlimited,

    /// Collected once the idle count reaches this many sweeps
    Sweeps(u32),
}

// =============================================================================
// ActorTypeDescriptor
// =============================================================================

/// Registered policy for one actor type
///
/// Resolved once at registration; `auto_reset_idle` and `max_idle` are
/// per-type overrides of the runtime-wide options (None means inherit).
#[derive(Debug, Clone)]
pub struct ActorTypeDescriptor {
    actor_name: String,
    type_id: TypeId,

    /// Whether sweep-driven unload takes the control lock.
    ///
    /// Opting out skips the lock and accepts a benign race where a
    /// concurrent activation of the same identity briefly coexists with
    /// the evicted instance's unload hook.
    strict_locking: bool,

    auto_reset_idle: Option<bool>,
    max_idle: Option<MaxIdle>,
}

impl ActorTypeDescriptor {
    /// Create a descriptor for the concrete actor type `T`
    pub fn new<T: Actor>(actor_name: impl Into<String>) -> Result<Self> {
        let actor_name = actor_name.into();
        // Reuse identity validation for the name part.
        ActorIdentity::new("probe", actor_name.clone()).map_err(|_| {
            Error::InvalidConfiguration {
                field: "actor_name".into(),
                reason: format!("'{}' is not a valid actor type name", actor_name),
            }
        })?;

        Ok(Self {
            actor_name,
            type_id: TypeId::of::<T>(),
            strict_locking: true,
            auto_reset_idle: None,
            max_idle: None,
        })
    }

    /// Opt this type out of strict locking during sweep unload
    pub fn with_relaxed_sweep_unload(mut self) -> Self {
        self.strict_locking = false;
        self
    }

    /// Override the runtime-wide idle auto-reset policy for this type
    pub fn with_auto_reset_idle(mut self, auto_reset: bool) -> Self {
        self.auto_reset_idle = Some(auto_reset);
        self
    }

    /// Override the runtime-wide idle budget for this type
    pub fn with_max_idle(mut self, max_idle: MaxIdle) -> Self {
        self.max_idle = Some(max_idle);
        self
    }

    /// Get the registered type name
    pub fn actor_name(&self) -> &str {
        &self.actor_name
    }

    /// Get the concrete Rust type this descriptor was registered for
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Whether sweep-driven unload takes the control lock
    pub fn strict_locking(&self) -> bool {
        self.strict_locking
    }

    /// Per-type auto-reset override (None inherits the runtime option)
    pub fn auto_reset_idle(&self) -> Option<bool> {
        self.auto_reset_idle
    }

    /// Per-type idle budget override (None inherits the runtime option)
    pub fn max_idle(&self) -> Option<MaxIdle> {
        self.max_idle
    }
}
