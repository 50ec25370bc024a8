//! Error types for Wisp
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Wisp operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wisp error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Registration Errors
    // =========================================================================
    #[error("Actor type not registered: {actor_name}")]
    NotRegistered { actor_name: String },

    #[error("Actor type already registered: {actor_name}")]
    AlreadyRegistered { actor_name: String },

    /// The per-type activation record limit is reached.
    ///
    /// Transient: records free up as the idle sweep collects them.
    #[error("Actor capacity reached for type: {actor_name}")]
    AtCapacity { actor_name: String },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Actor activation failed: {identity}")]
    ActivationFailed {
        identity: String,
        #[source]
        source: Box<Error>,
    },

    /// The activation record was collected out from under the caller.
    ///
    /// Callers retry by re-resolving the identity; the runtime's own
    /// message path does this internally.
    #[error("Actor deleted: {identity}")]
    ActorDeleted { identity: String },

    // =========================================================================
    // Dispatch Errors
    // =========================================================================
    #[error("No handler accepted message for actor: {identity}")]
    UnsupportedMessage { identity: String },

    // =========================================================================
    // Lock Errors
    // =========================================================================
    #[error("Keyed lock misuse: {reason}")]
    LockMisuse { reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid actor identity: {identity}, reason: {reason}")]
    InvalidIdentity { identity: String, reason: String },

    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a not-registered error
    pub fn not_registered(actor_name: impl Into<String>) -> Self {
        Self::NotRegistered {
            actor_name: actor_name.into(),
        }
    }

    /// Create an at-capacity error
    pub fn at_capacity(actor_name: impl Into<String>) -> Self {
        Self::AtCapacity {
            actor_name: actor_name.into(),
        }
    }

    /// Create an activation failed error wrapping the hook fault
    pub fn activation_failed(identity: impl Into<String>, source: Error) -> Self {
        Self::ActivationFailed {
            identity: identity.into(),
            source: Box::new(source),
        }
    }

    /// Create an actor deleted error
    pub fn actor_deleted(identity: impl Into<String>) -> Self {
        Self::ActorDeleted {
            identity: identity.into(),
        }
    }

    /// Create an unsupported message error
    pub fn unsupported_message(identity: impl Into<String>) -> Self {
        Self::UnsupportedMessage {
            identity: identity.into(),
        }
    }

    /// Create a lock misuse error
    pub fn lock_misuse(reason: impl Into<String>) -> Self {
        Self::LockMisuse {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error is transient and the caller may retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ActorDeleted { .. } | Self::AtCapacity { .. } | Self::Cancelled
        )
    }
}
