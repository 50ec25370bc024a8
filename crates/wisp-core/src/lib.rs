//! Wisp Core
//!
//! Core types, errors, and constants for the Wisp virtual actor runtime.
//!
//! # Overview
//!
//! Wisp is a single-process virtual actor runtime: actors are addressed by
//! a stable identity, activated on first use, driven one turn at a time,
//! and collected by a periodic idle sweep.
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `ACTOR_ID_LENGTH_BYTES_MAX`)
//! - Explicit state enums instead of integer sentinels

pub mod actor;
pub mod constants;
pub mod descriptor;
pub mod error;
pub mod identity;
pub mod options;
pub mod telemetry;

pub use actor::{Actor, ActorFactory, ActorMessage, FactoryProvider};
pub use constants::*;
pub use descriptor::{ActorTypeDescriptor, MaxIdle};
pub use error::{Error, Result};
pub use identity::ActorIdentity;
pub use options::RuntimeOptions;
pub use telemetry::{init_telemetry, TelemetryConfig};
