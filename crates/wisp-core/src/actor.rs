//! Actor abstractions for Wisp
//!
//! TigerStyle: Explicit lifecycle hooks, type-erased seams at trait objects.

use crate::error::Result;
use crate::identity::ActorIdentity;
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

// =============================================================================
// Actor Trait
// =============================================================================

/// Actor trait - implement to create virtual actors
///
/// An actor is activated on first use, owns its identity, and is only ever
/// driven by one turn at a time (the runtime serializes turns per identity).
/// The `Any` supertrait is what lets the handler registry dispatch on the
/// concrete type.
#[async_trait]
pub trait Actor: Any + Send {
    /// The identity this instance was activated for
    fn identity(&self) -> &ActorIdentity;

    /// Called after the instance is created, before its first turn
    ///
    /// A fault here aborts the activation: the runtime runs `on_unload`
    /// best-effort and reports the original error to the caller.
    async fn on_load(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called when the instance is unloaded (explicitly or by the sweep)
    async fn on_unload(&mut self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// ActorMessage
// =============================================================================

/// Marker trait for messages deliverable to actors
///
/// Messages cross the runtime type-erased; handlers recover the concrete
/// type with [`downcast_ref`](dyn ActorMessage::downcast_ref). Messages
/// are shared by reference and never mutated, and turns for different
/// identities run on different tasks, hence the `Sync` bound.
pub trait ActorMessage: Any + Send + Sync {}

impl dyn ActorMessage {
    /// Downcast a type-erased message to a concrete message type
    pub fn downcast_ref<M: ActorMessage>(&self) -> Option<&M> {
        (self as &dyn Any).downcast_ref::<M>()
    }

    /// Check whether the message is of the given concrete type
    pub fn is<M: ActorMessage>(&self) -> bool {
        (self as &dyn Any).is::<M>()
    }
}

// =============================================================================
// ActorFactory
// =============================================================================

/// Factory that creates actor instances
///
/// One factory is created per activation record and dropped when the record
/// unloads, so factories may hold per-activation resources.
#[async_trait]
pub trait ActorFactory: Send {
    /// Create a fresh actor instance for the given identity
    async fn create(&self, identity: &ActorIdentity) -> Result<Box<dyn Actor>>;
}

/// Provider of per-activation factories
///
/// Called each time an activation record needs a factory. The application
/// typically closes over its dependency graph here.
pub type FactoryProvider = Arc<dyn Fn() -> Box<dyn ActorFactory> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        identity: ActorIdentity,
        loaded: bool,
    }

    #[async_trait]
    impl Actor for Probe {
        fn identity(&self) -> &ActorIdentity {
            &self.identity
        }

        async fn on_load(&mut self) -> Result<()> {
            self.loaded = true;
            Ok(())
        }
    }

    struct Ping;
    struct Pong;
    impl ActorMessage for Ping {}
    impl ActorMessage for Pong {}

    #[tokio::test]
    async fn test_default_hooks_succeed() {
        let identity = ActorIdentity::new("1", "Probe").unwrap();
        let mut probe = Probe {
            identity,
            loaded: false,
        };
        probe.on_load().await.unwrap();
        assert!(probe.loaded);
        probe.on_unload().await.unwrap();
    }

    #[test]
    fn test_messages_are_shareable_across_tasks() {
        // A turn holds `&dyn ActorMessage` across await points inside a
        // spawned task, so the erased message type must be Sync.
        fn assert_sync<T: Sync + ?Sized>() {}
        assert_sync::<dyn ActorMessage>();
    }

    #[test]
    fn test_message_downcast() {
        let message: Box<dyn ActorMessage> = Box::new(Ping);
        assert!(message.is::<Ping>());
        assert!(!message.is::<Pong>());
        assert!(message.downcast_ref::<Ping>().is_some());
        assert!(message.downcast_ref::<Pong>().is_none());
    }
}
