//! Runtime-wide options
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::descriptor::MaxIdle;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Runtime-wide lifecycle options
///
/// Per-type descriptor overrides take precedence over `max_idle` and
/// `auto_reset_idle` where set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeOptions {
    /// Idle sweeps an actor survives before collection
    #[serde(default = "default_max_idle")]
    pub max_idle: MaxIdle,

    /// Period between idle sweeps (milliseconds)
    #[serde(default = "default_sweep_period_ms")]
    pub sweep_period_ms: u64,

    /// Whether every use resets the idle count
    ///
    /// When false, only the first use arms the idle counter and the actor
    /// is collected a fixed number of sweeps later regardless of traffic.
    #[serde(default)]
    pub auto_reset_idle: bool,
}

fn default_max_idle() -> MaxIdle {
    MaxIdle::Sweeps(IDLE_SWEEPS_COUNT_DEFAULT)
}

fn default_sweep_period_ms() -> u64 {
    SWEEP_PERIOD_MS_DEFAULT
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_idle: default_max_idle(),
            sweep_period_ms: default_sweep_period_ms(),
            auto_reset_idle: false,
        }
    }
}

impl RuntimeOptions {
    /// Validate the options
    pub fn validate(&self) -> Result<()> {
        if self.sweep_period_ms < SWEEP_PERIOD_MS_MIN {
            return Err(Error::InvalidConfiguration {
                field: "sweep_period_ms".into(),
                reason: format!(
                    "{} is below minimum {}",
                    self.sweep_period_ms, SWEEP_PERIOD_MS_MIN
                ),
            });
        }
        Ok(())
    }
}
