//! Capability checks
//!
//! Identity is established upstream; this module only answers whether a
//! given user holds a capability in a given room.

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;

/// Privileges recognised by the room services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// May drive playback directly (play/pause/seek/set track/stop/skip)
    RoomController,
    /// May remove other users' queue entries and suspend submitters
    Moderator,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::RoomController => write!(f, "room controller"),
            Capability::Moderator => write!(f, "moderator"),
        }
    }
}

/// Capability lookup
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn has_capability(&self, room_id: &str, user_id: &str, capability: Capability) -> bool;

    /// `Error::Unauthorized` unless the user holds `capability`
    async fn require(&self, room_id: &str, user_id: &str, capability: Capability) -> Result<()> {
        if self.has_capability(room_id, user_id, capability).await {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!(
                "{} is not a {} in {}",
                user_id, capability, room_id
            )))
        }
    }
}

/// Fixed capability table loaded from configuration
///
/// Controllers are implicitly moderators.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    controllers: HashSet<String>,
    moderators: HashSet<String>,
}

impl StaticAuthorizer {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            controllers: config.controllers.iter().cloned().collect(),
            moderators: config.moderators.iter().cloned().collect(),
        }
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn has_capability(&self, _room_id: &str, user_id: &str, capability: Capability) -> bool {
        match capability {
            Capability::RoomController => self.controllers.contains(user_id),
            Capability::Moderator => {
                self.moderators.contains(user_id) || self.controllers.contains(user_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorizer() -> StaticAuthorizer {
        StaticAuthorizer::from_config(&AuthConfig {
            controllers: vec!["dj".to_string()],
            moderators: vec!["mod".to_string()],
        })
    }

    #[tokio::test]
    async fn test_controller_is_also_moderator() {
        let auth = authorizer();
        assert!(auth.has_capability("r", "dj", Capability::RoomController).await);
        assert!(auth.has_capability("r", "dj", Capability::Moderator).await);
        assert!(auth.has_capability("r", "mod", Capability::Moderator).await);
        assert!(!auth.has_capability("r", "mod", Capability::RoomController).await);
    }

    #[tokio::test]
    async fn test_require_rejects_plain_users() {
        let auth = authorizer();
        let err = auth.require("r", "guest", Capability::RoomController).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(auth.require("r", "dj", Capability::RoomController).await.is_ok());
    }
}
