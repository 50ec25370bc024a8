//! Handler registry and message dispatch
//!
//! TigerStyle: Copy-on-write handler arrays, dispatch never blocks
//! registration.
//!
//! Handlers are registered per concrete actor type, with an optional
//! fallback level that sees every actor. Dispatch walks the concrete
//! level first, then the fallback level, in registration order; the first
//! handler that produces a future owns the turn. A message no handler
//! accepts is an `UnsupportedMessage` error.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use wisp_core::actor::{Actor, ActorMessage};
use wisp_core::error::{Error, Result};

/// Future driving one accepted message turn
pub type HandlerFuture<'a> = BoxFuture<'a, Result<()>>;

/// Opaque id for a registered handler, used for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

// =============================================================================
// Erased handlers
// =============================================================================

trait ErasedHandler: Send + Sync {
    /// Offer the message; resolves to None when this handler declines
    fn invoke<'a>(
        &'a self,
        actor: &'a mut dyn Actor,
        message: &'a dyn ActorMessage,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Option<Result<()>>>;
}

struct TypedHandler<T, F> {
    handler: F,
    _actor: PhantomData<fn(T)>,
}

impl<T, F> ErasedHandler for TypedHandler<T, F>
where
    T: Actor,
    F: for<'a> Fn(
            &'a mut T,
            &'a dyn ActorMessage,
            &'a CancellationToken,
        ) -> Option<HandlerFuture<'a>>
        + Send
        + Sync,
{
    fn invoke<'a>(
        &'a self,
        actor: &'a mut dyn Actor,
        message: &'a dyn ActorMessage,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Option<Result<()>>> {
        let actor: &mut dyn Any = actor;
        let Some(actor) = actor.downcast_mut::<T>() else {
            debug_assert!(false, "typed handler invoked for a foreign actor type");
            return Box::pin(async { None });
        };
        match (self.handler)(actor, message, cancel) {
            Some(turn) => Box::pin(async move { Some(turn.await) }),
            None => Box::pin(async { None }),
        }
    }
}

struct FallbackHandler<F> {
    handler: F,
}

impl<F> ErasedHandler for FallbackHandler<F>
where
    F: for<'a> Fn(
            &'a mut dyn Actor,
            &'a dyn ActorMessage,
            &'a CancellationToken,
        ) -> Option<HandlerFuture<'a>>
        + Send
        + Sync,
{
    fn invoke<'a>(
        &'a self,
        actor: &'a mut dyn Actor,
        message: &'a dyn ActorMessage,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Option<Result<()>>> {
        match (self.handler)(actor, message, cancel) {
            Some(turn) => Box::pin(async move { Some(turn.await) }),
            None => Box::pin(async { None }),
        }
    }
}

// =============================================================================
// HandlerRegistry
// =============================================================================

#[derive(Clone)]
struct HandlerEntry {
    id: HandlerId,
    handler: Arc<dyn ErasedHandler>,
}

#[derive(Default)]
struct RegistryState {
    typed: HashMap<TypeId, Arc<[HandlerEntry]>>,
    fallback: Arc<[HandlerEntry]>,
}

/// Type-indexed handler registry
///
/// Registration replaces whole handler arrays copy-on-write; dispatch
/// snapshots the arrays under a short mutex and never holds it across a
/// handler turn.
#[derive(Default)]
pub struct HandlerRegistry {
    state: Mutex<RegistryState>,
    next_id: AtomicU64,
}

fn locked(mutex: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for the concrete actor type `T`
    ///
    /// Return `None` from the closure to decline the message; later
    /// handlers are then offered it.
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
        let entry = HandlerEntry {
            id: self.next_handler_id(),
            handler: Arc::new(TypedHandler::<T, F> {
                handler,
                _actor: PhantomData,
            }),
        };
        let id = entry.id;

        let mut state = locked(&self.state);
        let current = state
            .typed
            .get(&TypeId::of::<T>())
            .cloned()
            .unwrap_or_default();
        state
            .typed
            .insert(TypeId::of::<T>(), Self::appended(&current, entry));
        id
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
        let entry = HandlerEntry {
            id: self.next_handler_id(),
            handler: Arc::new(FallbackHandler { handler }),
        };
        let id = entry.id;

        let mut state = locked(&self.state);
        let current = Arc::clone(&state.fallback);
        state.fallback = Self::appended(&current, entry);
        id
    }

    /// Remove a handler by id; returns whether anything was removed
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut state = locked(&self.state);

        let owner = state
            .typed
            .iter()
            .find(|(_, handlers)| handlers.iter().any(|entry| entry.id == id))
            .map(|(type_id, handlers)| (*type_id, Self::without(handlers, id)));
        if let Some((type_id, next)) = owner {
            if next.is_empty() {
                state.typed.remove(&type_id);
            } else {
                state.typed.insert(type_id, next);
            }
            return true;
        }

        if state.fallback.iter().any(|entry| entry.id == id) {
            let next = Self::without(&state.fallback, id);
            state.fallback = next;
            return true;
        }
        false
    }

    /// Drive one message turn against the actor
    pub async fn dispatch(
        &self,
        actor: &mut dyn Actor,
        message: &dyn ActorMessage,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let type_id = {
            let actor: &dyn Actor = &*actor;
            let actor: &dyn Any = actor;
            actor.type_id()
        };

        let (typed, fallback) = {
            let state = locked(&self.state);
            (
                state.typed.get(&type_id).cloned(),
                Arc::clone(&state.fallback),
            )
        };

        if let Some(handlers) = typed {
            for entry in handlers.iter() {
                if let Some(result) = entry.handler.invoke(&mut *actor, message, cancel).await {
                    return result;
                }
            }
        }
        for entry in fallback.iter() {
            if let Some(result) = entry.handler.invoke(&mut *actor, message, cancel).await {
                return result;
            }
        }

        Err(Error::unsupported_message(actor.identity().to_string()))
    }

    fn next_handler_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn appended(current: &Arc<[HandlerEntry]>, entry: HandlerEntry) -> Arc<[HandlerEntry]> {
        let mut next: Vec<HandlerEntry> = current.iter().cloned().collect();
        next.push(entry);
        next.into()
    }

    fn without(current: &Arc<[HandlerEntry]>, id: HandlerId) -> Arc<[HandlerEntry]> {
        current
            .iter()
            .filter(|entry| entry.id != id)
            .cloned()
            .collect::<Vec<_>>()
            .into()
    }
}
