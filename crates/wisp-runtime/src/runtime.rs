//! The actor runtime
//!
//! TigerStyle: One cheaply-cloneable handle over shared state, explicit
//! start/stop, no global singletons.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wisp_core::actor::{Actor, ActorFactory, ActorMessage, FactoryProvider};
use wisp_core::descriptor::ActorTypeDescriptor;
use wisp_core::error::{Error, Result};
use wisp_core::identity::ActorIdentity;
use wisp_core::options::RuntimeOptions;

use crate::ctrl::{ControlLock, KeyedControlLock};
use crate::dispatch::{HandlerFuture, HandlerId, HandlerRegistry};
use crate::manager::ActorManager;

// =============================================================================
// RuntimeInner
// =============================================================================

pub(crate) struct RuntimeInner {
    pub(crate) options: RuntimeOptions,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) factory_provider: FactoryProvider,
    pub(crate) ctrl_lock: Arc<dyn ControlLock>,
    managers: RwLock<HashMap<String, Arc<ActorManager>>>,
    stopping: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RuntimeInner {
    pub(crate) fn manager(&self, actor_name: &str) -> Option<Arc<ActorManager>> {
        self.managers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(actor_name)
            .cloned()
    }

    fn managers_snapshot(&self) -> Vec<Arc<ActorManager>> {
        self.managers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// ActorRuntime
// =============================================================================

/// Handle to the virtual actor runtime
///
/// Clone freely; all clones drive the same runtime. Actor types are
/// registered by descriptor, messages are addressed by identity, and a
/// periodic sweep collects idle activations.
#[derive(Clone)]
pub struct ActorRuntime {
    inner: Arc<RuntimeInner>,
}

impl ActorRuntime {
    /// Start building a runtime
    pub fn builder() -> ActorRuntimeBuilder {
        ActorRuntimeBuilder::new()
    }

    /// Register an actor type
    ///
    /// # Errors
    /// Returns `AlreadyRegistered` if the type name is taken.
    pub fn register_actor(&self, descriptor: ActorTypeDescriptor) -> Result<()> {
        let mut managers = self
            .inner
            .managers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if managers.contains_key(descriptor.actor_name()) {
            return Err(Error::AlreadyRegistered {
                actor_name: descriptor.actor_name().to_string(),
            });
        }

        info!(actor_name = descriptor.actor_name(), "actor type registered");
        managers.insert(
            descriptor.actor_name().to_string(),
            Arc::new(ActorManager::new(descriptor)),
        );
        Ok(())
    }

    /// Get the registered descriptor for a type name
    pub fn descriptor(&self, actor_name: &str) -> Option<ActorTypeDescriptor> {
        self.inner
            .manager(actor_name)
            .map(|manager| manager.descriptor().clone())
    }

    /// Get the registered descriptor for the concrete actor type `T`
    pub fn descriptor_of<T: Actor>(&self) -> Option<ActorTypeDescriptor> {
        let type_id = std::any::TypeId::of::<T>();
        self.inner
            .managers_snapshot()
            .into_iter()
            .map(|manager| manager.descriptor().clone())
            .find(|descriptor| descriptor.type_id() == type_id)
    }

    /// The runtime-wide options
    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    /// Token cancelled when the runtime begins stopping
    pub fn stopping(&self) -> CancellationToken {
        self.inner.stopping.clone()
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Register a message handler for the concrete actor type `T`
    pub fn add_handler<T, F>(&self, handler: F) -> HandlerId
    where
        T: Actor,
        F: for<'a> Fn(
                &'a mut T,
                &'a dyn ActorMessage,
                &'a CancellationToken,
            ) -> Option<HandlerFuture<'a>>
            + Send
            + Sync
            + 'static,
    {
        self.inner.handlers.add_handler::<T, F>(handler)
    }

    /// Register a fallback handler offered to every actor type
    pub fn add_fallback_handler<F>(&self, handler: F) -> HandlerId
    where
        F: for<'a> Fn(
                &'a mut dyn Actor,
                &'a dyn ActorMessage,
                &'a CancellationToken,
            ) -> Option<HandlerFuture<'a>>
            + Send
            + Sync
            + 'static,
    {
        self.inner.handlers.add_fallback_handler(handler)
    }

    /// Remove a handler by id
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.handlers.remove_handler(id)
    }

    // =========================================================================
    // Message path
    // =========================================================================

    /// Deliver one message to the actor with `identity`
    ///
    /// Activates the actor if needed and runs exactly one serialized turn.
    /// Cancellation while waiting for the turn returns `Cancelled`.
    pub async fn handle_message(
        &self,
        identity: &ActorIdentity,
        message: &dyn ActorMessage,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(manager) = self.inner.manager(identity.actor_name()) else {
            return Err(Error::not_registered(identity.actor_name()));
        };
        manager
            .handle_message(&self.inner, identity, message, cancel)
            .await
    }

    /// Unload the actor with `identity`, running its unload hook
    ///
    /// No-op when the actor is not active (or its type is not registered).
    pub async fn unload(
        &self,
        identity: &ActorIdentity,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(manager) = self.inner.manager(identity.actor_name()) else {
            return Ok(());
        };
        manager.unload(&self.inner, identity, cancel).await
    }

    /// Number of live activation records for a type (diagnostics)
    pub fn live_count(&self, actor_name: &str) -> usize {
        self.inner
            .manager(actor_name)
            .map(|manager| manager.live_count())
            .unwrap_or(0)
    }

    // =========================================================================
    // Sweeping
    // =========================================================================

    /// Start the periodic idle sweep
    ///
    /// Idempotent. The timer is quiet while a sweep runs, so sweeps never
    /// overlap.
    pub fn start_sweeping(&self) {
        let mut sweeper = locked(&self.inner.sweeper);
        if sweeper.is_some() || self.inner.stopping.is_cancelled() {
            return;
        }

        let runtime = self.clone();
        let period = Duration::from_millis(self.inner.options.sweep_period_ms);
        info!(period_ms = self.inner.options.sweep_period_ms, "sweep started");
        *sweeper = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = runtime.inner.stopping.cancelled() => break,
                }
                runtime.sweep_once(false).await;
            }
        }));
    }

    /// Stop sweeping and run one final stopping sweep
    ///
    /// The stopping sweep forces every activation out and awaits all unload
    /// hooks. The runtime cannot be restarted afterwards.
    pub async fn stop_sweeping(&self) {
        self.inner.stopping.cancel();
        let task = locked(&self.inner.sweeper).take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(%error, "sweep task join failed");
            }
        }
        self.sweep_once(true).await;
        info!("sweep stopped");
    }

    /// Run one sweep pass now
    ///
    /// Steady-state sweeps queue unloads fire-and-forget; a `stopping`
    /// sweep forces collection and awaits every unload hook. Exposed so
    /// tests and embedders can drive collection deterministically.
    pub async fn sweep_once(&self, stopping: bool) {
        // The stopping sweep must not be aborted by the sweep-loop token
        // that was just cancelled.
        let cancel = if stopping {
            CancellationToken::new()
        } else {
            self.inner.stopping.clone()
        };

        let managers = self.inner.managers_snapshot();
        let mut unloads: Vec<BoxFuture<'static, ()>> = Vec::new();
        for manager in &managers {
            if cancel.is_cancelled() {
                return;
            }
            manager.sweep_into(&self.inner, stopping, &cancel, &mut unloads);
        }
        if unloads.is_empty() {
            return;
        }

        debug!(unloads = unloads.len(), stopping, "sweep collected actors");
        if stopping {
            futures::future::join_all(unloads).await;
        } else {
            tokio::spawn(async move {
                futures::future::join_all(unloads).await;
            });
        }
    }
}

// =============================================================================
// ActorRuntimeBuilder
// =============================================================================

type Initializer = Box<dyn FnOnce(&ActorRuntime) -> Result<()> + Send>;

/// Builder for [`ActorRuntime`]
///
/// A factory provider is required; everything else has defaults.
/// Initializers run once at build time with the constructed runtime, which
/// is where applications register their actor types and handlers.
pub struct ActorRuntimeBuilder {
    options: RuntimeOptions,
    factory_provider: Option<FactoryProvider>,
    ctrl_lock: Option<Arc<dyn ControlLock>>,
    initializers: Vec<Initializer>,
}

impl Default for ActorRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            options: RuntimeOptions::default(),
            factory_provider: None,
            ctrl_lock: None,
            initializers: Vec::new(),
        }
    }

    /// Set the runtime-wide options
    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the factory provider called once per activation record
    pub fn with_factory_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Box<dyn ActorFactory> + Send + Sync + 'static,
    {
        self.factory_provider = Some(Arc::new(provider));
        self
    }

    /// Substitute the control lock implementation
    pub fn with_control_lock(mut self, ctrl_lock: Arc<dyn ControlLock>) -> Self {
        self.ctrl_lock = Some(ctrl_lock);
        self
    }

    /// Add an initializer run once at build time
    pub fn with_initializer<F>(mut self, initializer: F) -> Self
    where
        F: FnOnce(&ActorRuntime) -> Result<()> + Send + 'static,
    {
        self.initializers.push(Box::new(initializer));
        self
    }

    /// Build the runtime and run all initializers
    pub fn build(self) -> Result<ActorRuntime> {
        self.options.validate()?;
        let factory_provider =
            self.factory_provider
                .ok_or_else(|| Error::InvalidConfiguration {
                    field: "factory_provider".into(),
                    reason: "a factory provider is required".into(),
                })?;
        let ctrl_lock = self
            .ctrl_lock
            .unwrap_or_else(|| Arc::new(KeyedControlLock::new()));

        let runtime = ActorRuntime {
            inner: Arc::new(RuntimeInner {
                options: self.options,
                handlers: HandlerRegistry::new(),
                factory_provider,
                ctrl_lock,
                managers: RwLock::new(HashMap::new()),
                stopping: CancellationToken::new(),
                sweeper: Mutex::new(None),
            }),
        };

        for initializer in self.initializers {
            initializer(&runtime)?;
        }
        Ok(runtime)
    }
}
