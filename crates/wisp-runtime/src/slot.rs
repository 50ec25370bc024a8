//! Activation records
//!
//! TigerStyle: Explicit state enum for the idle counter, monotonic
//! `collected` flag, all transitions under one short mutex.
//!
//! An [`ActorSlot`] tracks one activation of one identity: the live
//! instance (if loaded), its per-activation factory, a pin count of
//! in-flight turns, and the idle bookkeeping the sweep reads. A slot is
//! collected exactly once; afterwards it only tombstones the identity
//! until the unload task removes it from the manager's map.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use wisp_core::actor::{Actor, ActorFactory, FactoryProvider};
use wisp_core::descriptor::MaxIdle;
use wisp_core::error::{Error, Result};
use wisp_core::identity::ActorIdentity;

// =============================================================================
// IdleState
// =============================================================================

/// Idle bookkeeping for one activation record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdleState {
    /// Never used; the sweep skips fresh records entirely
    Fresh,

    /// Consecutive sweeps since the counter was last armed or reset
    Idle(u32),
}

/// How a caller pins the slot
#[derive(Debug, Clone, Copy)]
pub(crate) enum UsePolicy {
    /// Pin for a message turn
    Turn { auto_reset: bool },

    /// Pin for an explicit unload; marks the record for forced collection
    ForceCollect,
}

// =============================================================================
// ActorSlot
// =============================================================================

#[derive(Default)]
pub(crate) struct ActorSlot {
    state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    actor: Option<Box<dyn Actor>>,
    /// Scoped to the activation; dropped when the record unloads
    factory: Option<Box<dyn ActorFactory>>,
    /// True from a successful load until the unload hook runs
    ///
    /// Stays true while a turn temporarily has the instance taken out of
    /// `actor`, so liveness checks cannot mistake a mid-turn record for an
    /// empty one.
    loaded: bool,
    ref_count: u32,
    idle: IdleState,
    collected: bool,
    collect_early: bool,
}

impl Default for IdleState {
    fn default() -> Self {
        IdleState::Fresh
    }
}

fn locked(mutex: &Mutex<SlotState>) -> MutexGuard<'_, SlotState> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ActorSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pin the slot for use
    ///
    /// Fails iff the slot is already collected; the caller then re-resolves
    /// the identity to a fresh slot.
    pub(crate) fn try_use(&self, policy: UsePolicy) -> bool {
        let mut state = locked(&self.state);
        if state.collected {
            return false;
        }

        state.ref_count += 1;
        match policy {
            UsePolicy::ForceCollect => state.collect_early = true,
            UsePolicy::Turn { auto_reset } => {
                if auto_reset || state.idle == IdleState::Fresh {
                    state.idle = IdleState::Idle(0);
                }
            }
        }
        true
    }

    /// Drop one pin
    pub(crate) fn un_use(&self) {
        let mut state = locked(&self.state);
        debug_assert!(state.ref_count > 0, "unpin without matching pin");
        state.ref_count = state.ref_count.saturating_sub(1);
    }

    /// Mark for forced collection without pinning
    pub(crate) fn mark_collect_early(&self) {
        locked(&self.state).collect_early = true;
    }

    /// One sweep's verdict on this record
    ///
    /// Returns true exactly once, when the record transitions to collected.
    /// Pinned or never-used records are always spared; otherwise the idle
    /// counter advances until it reaches the budget.
    pub(crate) fn try_collect(&self, max_idle: MaxIdle) -> bool {
        let mut state = locked(&self.state);
        if state.collected || state.ref_count > 0 {
            return false;
        }
        let IdleState::Idle(idle) = state.idle else {
            return false;
        };

        if state.collect_early {
            state.collected = true;
            return true;
        }

        match max_idle {
            MaxIdle::Sweeps(budget) if idle >= budget => {
                state.collected = true;
                true
            }
            _ => {
                state.idle = IdleState::Idle(idle.saturating_add(1));
                false
            }
        }
    }

    /// Whether the activation is live
    ///
    /// Unlike checking `actor` directly, this holds across the dispatch
    /// window where a turn has the instance taken out.
    pub(crate) fn is_loaded(&self) -> bool {
        locked(&self.state).loaded
    }

    /// Take the instance out for a dispatch turn
    ///
    /// The caller holds the control lock, so nothing else can observe the
    /// empty slot as a missing activation.
    pub(crate) fn take_actor(&self) -> Option<Box<dyn Actor>> {
        locked(&self.state).actor.take()
    }

    /// Return the instance after a dispatch turn
    pub(crate) fn put_actor(&self, actor: Box<dyn Actor>) {
        let mut state = locked(&self.state);
        debug_assert!(state.actor.is_none(), "slot already holds an instance");
        state.actor = Some(actor);
    }

    /// Load the instance if not yet loaded
    ///
    /// Creates the scoped factory on first need, creates the instance, and
    /// runs `on_load`. A faulted load runs `on_unload` best-effort, drops
    /// the factory, and surfaces the original fault as `ActivationFailed`.
    /// Caller must hold the control lock for the identity.
    pub(crate) async fn ensure_loaded(
        &self,
        identity: &ActorIdentity,
        provider: &FactoryProvider,
    ) -> Result<()> {
        let factory = {
            let mut state = locked(&self.state);
            if state.loaded {
                return Ok(());
            }
            match state.factory.take() {
                Some(factory) => factory,
                None => provider(),
            }
        };

        let created = factory.create(identity).await;
        let mut actor = {
            let mut state = locked(&self.state);
            state.factory = Some(factory);
            match created {
                Ok(actor) => actor,
                Err(error) => {
                    state.factory = None;
                    return Err(Error::activation_failed(identity.to_string(), error));
                }
            }
        };

        match actor.on_load().await {
            Ok(()) => {
                let mut state = locked(&self.state);
                state.actor = Some(actor);
                state.loaded = true;
                drop(state);
                trace!(%identity, "actor loaded");
                Ok(())
            }
            Err(error) => {
                // Best-effort cleanup; the load fault is what the caller sees.
                let _ = actor.on_unload().await;
                locked(&self.state).factory = None;
                Err(Error::activation_failed(identity.to_string(), error))
            }
        }
    }

    /// Run the unload hook and drop the scoped factory
    ///
    /// No-op when the instance was never loaded or already unloaded. The
    /// factory is dropped even when the hook fails.
    pub(crate) async fn call_on_unload(&self) -> Result<()> {
        let taken = {
            let mut state = locked(&self.state);
            let actor = state.actor.take();
            if actor.is_some() {
                state.loaded = false;
            }
            actor
        };
        let Some(mut actor) = taken else {
            return Ok(());
        };
        let result = actor.on_unload().await;
        locked(&self.state).factory = None;
        result
    }
}
