//! Per-type actor managers
//!
//! TigerStyle: One manager per registered actor type, one concurrent map
//! of activation records, control lock around every load/turn/unload.
//!
//! A message turn is: pin the slot, take the control lock, load if needed,
//! dispatch, release, unpin. The pin keeps the sweep's collector away for
//! the whole turn; the control lock serializes the turn against other
//! turns and against lifecycle operations for the same identity.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use wisp_core::actor::ActorMessage;
use wisp_core::constants::ACTOR_CONCURRENT_COUNT_MAX;
use wisp_core::descriptor::{ActorTypeDescriptor, MaxIdle};
use wisp_core::error::{Error, Result};
use wisp_core::identity::ActorIdentity;
use wisp_core::options::RuntimeOptions;

use crate::runtime::RuntimeInner;
use crate::slot::{ActorSlot, UsePolicy};

pub(crate) struct ActorManager {
    descriptor: ActorTypeDescriptor,
    slots: DashMap<ActorIdentity, Arc<ActorSlot>>,
    /// Upper bound on live activation records for this type
    max_actors: usize,
}

impl ActorManager {
    pub(crate) fn new(descriptor: ActorTypeDescriptor) -> Self {
        Self {
            descriptor,
            slots: DashMap::new(),
            max_actors: ACTOR_CONCURRENT_COUNT_MAX,
        }
    }

    pub(crate) fn descriptor(&self) -> &ActorTypeDescriptor {
        &self.descriptor
    }

    /// Number of live activation records (including tombstones pending removal)
    pub(crate) fn live_count(&self) -> usize {
        self.slots.len()
    }

    fn auto_reset_idle(&self, options: &RuntimeOptions) -> bool {
        self.descriptor
            .auto_reset_idle()
            .unwrap_or(options.auto_reset_idle)
    }

    fn max_idle(&self, options: &RuntimeOptions) -> MaxIdle {
        self.descriptor.max_idle().unwrap_or(options.max_idle)
    }

    /// Remove the record only if the map still points at this exact slot
    ///
    /// Prevents an unload racing a reactivation from tearing down the
    /// successor's fresh record under the same identity.
    fn remove_if_same(&self, identity: &ActorIdentity, slot: &Arc<ActorSlot>) -> bool {
        self.slots
            .remove_if(identity, |_, current| Arc::ptr_eq(current, slot))
            .is_some()
    }

    /// Refuse new identities once the record count reaches the limit
    ///
    /// The count is read without the map locked, so racing first messages
    /// can briefly overshoot the limit by their number.
    fn ensure_capacity(&self, identity: &ActorIdentity) -> Result<()> {
        if self.slots.len() >= self.max_actors && !self.slots.contains_key(identity) {
            return Err(Error::at_capacity(self.descriptor.actor_name()));
        }
        Ok(())
    }

    // =========================================================================
    // Message turns
    // =========================================================================

    pub(crate) async fn handle_message(
        &self,
        shared: &RuntimeInner,
        identity: &ActorIdentity,
        message: &dyn ActorMessage,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if identity.actor_name() != self.descriptor.actor_name() {
            return Err(Error::internal(format!(
                "identity {} routed to manager for '{}'",
                identity,
                self.descriptor.actor_name()
            )));
        }

        self.ensure_capacity(identity)?;

        let auto_reset = self.auto_reset_idle(&shared.options);
        let slot = loop {
            let slot: Arc<ActorSlot> = self
                .slots
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(ActorSlot::new()))
                .clone();
            if slot.try_use(UsePolicy::Turn { auto_reset }) {
                break slot;
            }
            // Collected tombstone; its unload task removes it from the map,
            // after which the next iteration creates a fresh record.
            tokio::task::yield_now().await;
        };

        let token = match shared.ctrl_lock.acquire(identity, cancel).await {
            Ok(token) => token,
            Err(error) => {
                slot.un_use();
                return Err(error);
            }
        };

        let result = self.run_turn(shared, identity, &slot, message, cancel).await;

        shared.ctrl_lock.release(token).await;
        slot.un_use();
        result
    }

    async fn run_turn(
        &self,
        shared: &RuntimeInner,
        identity: &ActorIdentity,
        slot: &Arc<ActorSlot>,
        message: &dyn ActorMessage,
        cancel: &CancellationToken,
    ) -> Result<()> {
        slot.ensure_loaded(identity, &shared.factory_provider).await?;

        let mut actor = slot
            .take_actor()
            .ok_or_else(|| Error::actor_deleted(identity.to_string()))?;
        let result = shared.handlers.dispatch(actor.as_mut(), message, cancel).await;
        slot.put_actor(actor);
        result
    }

    // =========================================================================
    // Explicit unload
    // =========================================================================

    pub(crate) async fn unload(
        &self,
        shared: &RuntimeInner,
        identity: &ActorIdentity,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(slot) = self.slots.get(identity).map(|entry| Arc::clone(entry.value())) else {
            return Ok(());
        };
        // Pin with the forced-collection mark; a collected slot is already
        // on its way out and needs no help.
        if !slot.try_use(UsePolicy::ForceCollect) {
            return Ok(());
        }

        let result = self.unload_pinned(shared, identity, &slot, cancel).await;
        slot.un_use();
        result
    }

    async fn unload_pinned(
        &self,
        shared: &RuntimeInner,
        identity: &ActorIdentity,
        slot: &Arc<ActorSlot>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // Liveness, not instance presence: an in-flight turn has the
        // instance taken out but the activation is still live, and the
        // unload below must wait for the turn's lock hold to end.
        if !slot.is_loaded() {
            return Ok(());
        }

        let token = shared.ctrl_lock.acquire(identity, cancel).await?;
        let result = {
            if slot.is_loaded() && self.remove_if_same(identity, slot) {
                debug!(%identity, "actor unloaded explicitly");
                slot.call_on_unload().await
            } else {
                Ok(())
            }
        };
        shared.ctrl_lock.release(token).await;
        result
    }

    // =========================================================================
    // Sweeping
    // =========================================================================

    /// Scan all records, advancing idle counters, and queue unload work
    ///
    /// When `stopping`, every record is marked for forced collection and
    /// unloaded regardless of its idle budget.
    pub(crate) fn sweep_into(
        self: &Arc<Self>,
        shared: &Arc<RuntimeInner>,
        stopping: bool,
        cancel: &CancellationToken,
        unloads: &mut Vec<BoxFuture<'static, ()>>,
    ) {
        let max_idle = self.max_idle(&shared.options);
        for entry in self.slots.iter() {
            if cancel.is_cancelled() {
                return;
            }
            if stopping {
                entry.value().mark_collect_early();
            } else if !entry.value().try_collect(max_idle) {
                continue;
            }

            let manager = Arc::clone(self);
            let shared = Arc::clone(shared);
            let identity = entry.key().clone();
            let slot = Arc::clone(entry.value());
            let cancel = cancel.clone();
            unloads.push(Box::pin(async move {
                manager
                    .sweep_unload(&shared, &identity, &slot, stopping, &cancel)
                    .await;
            }));
        }
    }

    /// Unload one swept record; faults are logged, never propagated
    async fn sweep_unload(
        &self,
        shared: &RuntimeInner,
        identity: &ActorIdentity,
        slot: &Arc<ActorSlot>,
        stopping: bool,
        cancel: &CancellationToken,
    ) {
        if !slot.is_loaded() {
            // Never loaded (or already unloaded); still drop the tombstone.
            self.remove_if_same(identity, slot);
            return;
        }

        if !stopping && !self.descriptor.strict_locking() {
            // Relaxed types skip the control lock here and accept that a
            // concurrent reactivation may briefly overlap this unload hook.
            // A collected record cannot have a turn in flight, so the
            // instance is guaranteed to be in the slot.
            if self.remove_if_same(identity, slot) {
                if let Err(error) = slot.call_on_unload().await {
                    warn!(%identity, %error, "unload hook failed during sweep");
                }
            }
            return;
        }

        // Stopping sweeps always serialize against in-flight turns, even
        // for relaxed types, so shutdown can await every unload hook.
        let token = match shared.ctrl_lock.acquire(identity, cancel).await {
            Ok(token) => token,
            Err(error) => {
                trace!(%identity, %error, "sweep unload abandoned");
                return;
            }
        };
        if slot.is_loaded() && self.remove_if_same(identity, slot) {
            if let Err(error) = slot.call_on_unload().await {
                warn!(%identity, %error, "unload hook failed during sweep");
            }
        }
        shared.ctrl_lock.release(token).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use wisp_core::actor::Actor;

    struct Echo {
        identity: ActorIdentity,
    }

    #[async_trait]
    impl Actor for Echo {
        fn identity(&self) -> &ActorIdentity {
            &self.identity
        }
    }

    fn manager(descriptor: ActorTypeDescriptor) -> ActorManager {
        ActorManager::new(descriptor)
    }

    #[test]
    fn test_policy_resolution_prefers_descriptor() {
        let options = RuntimeOptions {
            auto_reset_idle: false,
            max_idle: MaxIdle::Sweeps(1),
            ..Default::default()
        };

        let inherit = manager(ActorTypeDescriptor::new::<Echo>("Echo").unwrap());
        assert!(!inherit.auto_reset_idle(&options));
        assert_eq!(inherit.max_idle(&options), MaxIdle::Sweeps(1));

        let overridden = manager(
            ActorTypeDescriptor::new::<Echo>("Echo")
                .unwrap()
                .with_auto_reset_idle(true)
                .with_max_idle(MaxIdle::Unlimited),
        );
        assert!(overridden.auto_reset_idle(&options));
        assert_eq!(overridden.max_idle(&options), MaxIdle::Unlimited);
    }

    #[test]
    fn test_remove_if_same_spares_successor() {
        let manager = manager(ActorTypeDescriptor::new::<Echo>("Echo").unwrap());
        let identity = ActorIdentity::new("1", "Echo").unwrap();

        let original = Arc::new(ActorSlot::new());
        manager.slots.insert(identity.clone(), Arc::clone(&original));

        let successor = Arc::new(ActorSlot::new());
        manager.slots.insert(identity.clone(), Arc::clone(&successor));

        // Removing the stale record leaves the successor in place.
        assert!(!manager.remove_if_same(&identity, &original));
        assert_eq!(manager.live_count(), 1);
        assert!(manager.remove_if_same(&identity, &successor));
        assert_eq!(manager.live_count(), 0);
    }

    #[test]
    fn test_capacity_limit_refuses_new_identities() {
        let manager = ActorManager {
            descriptor: ActorTypeDescriptor::new::<Echo>("Echo").unwrap(),
            slots: DashMap::new(),
            max_actors: 1,
        };
        let first = ActorIdentity::new("1", "Echo").unwrap();
        let second = ActorIdentity::new("2", "Echo").unwrap();
        manager.slots.insert(first.clone(), Arc::new(ActorSlot::new()));

        // Existing identities keep working at the limit; new ones do not.
        assert!(manager.ensure_capacity(&first).is_ok());
        let result = manager.ensure_capacity(&second);
        assert!(matches!(result, Err(Error::AtCapacity { .. })));
    }
}
