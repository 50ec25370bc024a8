//! Actor identity
//!
//! TigerStyle: Explicit validation on construction, immutable after creation.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// Unique identifier for a virtual actor
///
/// An identity pairs an application-chosen id with the registered actor
/// type name. Two identities are the same actor exactly when both parts
/// are equal; the runtime keys activation records and control locks on
/// this value.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ActorIdentity {
    id: String,
    actor_name: String,
}

impl ActorIdentity {
    /// Create a new identity with validation
    ///
    /// # Errors
    /// Returns error if either part is empty or exceeds length limits.
    pub fn new(id: impl Into<String>, actor_name: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let actor_name = actor_name.into();

        if id.is_empty() {
            return Err(Error::InvalidIdentity {
                identity: format!("/{}/{}", id, actor_name),
                reason: "id must not be empty".into(),
            });
        }

        if actor_name.is_empty() {
            return Err(Error::InvalidIdentity {
                identity: format!("/{}/{}", id, actor_name),
                reason: "actor_name must not be empty".into(),
            });
        }

        if id.len() > ACTOR_ID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidIdentity {
                identity: format!("/{}/{}", id, actor_name),
                reason: format!(
                    "id length {} exceeds limit {}",
                    id.len(),
                    ACTOR_ID_LENGTH_BYTES_MAX
                ),
            });
        }

        if actor_name.len() > ACTOR_NAME_LENGTH_BYTES_MAX {
            return Err(Error::InvalidIdentity {
                identity: format!("/{}/{}", id, actor_name),
                reason: format!(
                    "actor_name length {} exceeds limit {}",
                    actor_name.len(),
                    ACTOR_NAME_LENGTH_BYTES_MAX
                ),
            });
        }

        Ok(Self { id, actor_name })
    }

    /// Create an identity without validation (for internal use only)
    #[doc(hidden)]
    pub fn new_unchecked(id: String, actor_name: String) -> Self {
        debug_assert!(!id.is_empty(), "id must not be empty");
        debug_assert!(id.len() <= ACTOR_ID_LENGTH_BYTES_MAX);
        debug_assert!(actor_name.len() <= ACTOR_NAME_LENGTH_BYTES_MAX);
        Self { id, actor_name }
    }

    /// Get the application-chosen id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the actor type name
    pub fn actor_name(&self) -> &str {
        &self.actor_name
    }
}

impl fmt::Display for ActorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/actor/{}/{}", self.id, self.actor_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_valid() {
        let identity = ActorIdentity::new("player-42", "Player").unwrap();
        assert_eq!(identity.id(), "player-42");
        assert_eq!(identity.actor_name(), "Player");
    }

    #[test]
    fn test_identity_display() {
        let identity = ActorIdentity::new("7", "Echo").unwrap();
        assert_eq!(identity.to_string(), "/actor/7/Echo");
    }

    #[test]
    fn test_identity_value_equality() {
        let a = ActorIdentity::new("1", "Echo").unwrap();
        let b = ActorIdentity::new("1", "Echo").unwrap();
        let c = ActorIdentity::new("1", "Player").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_identity_empty_parts_rejected() {
        assert!(ActorIdentity::new("", "Echo").is_err());
        assert!(ActorIdentity::new("1", "").is_err());
    }

    #[test]
    fn test_identity_too_long() {
        let long_id = "a".repeat(ACTOR_ID_LENGTH_BYTES_MAX + 1);
        let result = ActorIdentity::new(long_id, "Echo");
        assert!(matches!(result, Err(Error::InvalidIdentity { .. })));
    }
}
