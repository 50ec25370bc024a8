//! Wisp Runtime
//!
//! Virtual actor lifecycle for Wisp: activation records, per-type
//! managers, the idle sweep, and type-indexed message dispatch.
//!
//! # Overview
//!
//! Actors are addressed by [`ActorIdentity`](wisp_core::ActorIdentity) and
//! activated on first message. Each identity runs one turn at a time under
//! a control lock; a periodic sweep advances per-record idle counters and
//! unloads records that exhaust their budget.
//!
//! # TigerStyle
//!
//! - Explicit lifecycle: pin, turn, unpin; collected is terminal
//! - Control lock around every load/turn/unload (per-type opt-out)
//! - Sweeps never overlap; shutdown awaits every unload hook

pub mod ctrl;
pub mod dispatch;
mod manager;
pub mod runtime;
mod slot;

pub use ctrl::{ControlLock, ControlToken, KeyedControlLock};
pub use dispatch::{HandlerFuture, HandlerId, HandlerRegistry};
pub use runtime::{ActorRuntime, ActorRuntimeBuilder};
