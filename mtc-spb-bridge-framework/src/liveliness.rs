//! Liveliness tokens for edge node and device presence.
//!
//! Zenoh has no last-will mechanism, so Sparkplug death semantics are
//! mirrored with liveliness tokens: a token is held for every born node and
//! device, and dropping it (explicitly or because the session died) tells
//! subscribers the entity went offline.
//!
//! # Key Expressions
//!
//! - Relay liveliness: `<prefix>/@/alive`
//! - Entity liveliness: `<prefix>/@/<entity>/alive`, e.g.
//!   `spBv1.0/1_8/@/agent1/dev-123/alive`

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use zenoh::Session;
use zenoh::liveliness::LivelinessToken;

use crate::error::{BridgeError, Result};

/// Manages liveliness tokens for the relay and the entities it publishes.
///
/// The relay token is declared on creation and undeclared on drop.
#[derive(Debug)]
pub struct LivelinessManager {
    session: Arc<Session>,
    key_prefix: String,
    #[allow(dead_code)]
    relay_token: LivelinessToken,
    tokens: RwLock<HashMap<String, LivelinessToken>>,
}

impl LivelinessManager {
    /// Create a new liveliness manager and declare the relay as alive.
    pub async fn new(session: Arc<Session>, key_prefix: impl Into<String>) -> Result<Self> {
        let key_prefix = key_prefix.into();
        let relay_key = relay_key(&key_prefix);

        let relay_token = session
            .liveliness()
            .declare_token(&relay_key)
            .await
            .map_err(|e| BridgeError::liveliness(format!("Failed to declare relay token: {}", e)))?;

        tracing::info!(key = %relay_key, "Relay liveliness token declared");

        Ok(Self {
            session,
            key_prefix,
            relay_token,
            tokens: RwLock::new(HashMap::new()),
        })
    }

    /// Declare an entity (`<node>` or `<node>/<device>`) as alive.
    ///
    /// No-op if the entity already holds a token.
    pub async fn declare_alive(&self, entity: &str) -> Result<()> {
        if self.tokens.read().await.contains_key(entity) {
            return Ok(());
        }

        let key = entity_key(&self.key_prefix, entity);
        let token = self
            .session
            .liveliness()
            .declare_token(&key)
            .await
            .map_err(|e| {
                BridgeError::liveliness(format!("Failed to declare token for {}: {}", entity, e))
            })?;

        tracing::debug!(entity = %entity, key = %key, "Liveliness token declared");

        self.tokens.write().await.insert(entity.to_string(), token);
        Ok(())
    }

    /// Undeclare an entity. Dropping the token notifies subscribers.
    pub async fn undeclare(&self, entity: &str) {
        if self.tokens.write().await.remove(entity).is_some() {
            tracing::debug!(entity = %entity, "Liveliness token undeclared");
        }
    }

    /// Whether an entity currently holds a token.
    pub async fn is_alive(&self, entity: &str) -> bool {
        self.tokens.read().await.contains_key(entity)
    }

    /// Entities currently declared alive.
    pub async fn alive(&self) -> Vec<String> {
        self.tokens.read().await.keys().cloned().collect()
    }

    /// Get the key prefix.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Undeclare every entity token. The relay token is kept.
    pub async fn undeclare_all(&self) {
        let mut tokens = self.tokens.write().await;
        let count = tokens.len();
        tokens.clear();
        if count > 0 {
            tracing::debug!(count = count, "All liveliness tokens undeclared");
        }
    }
}

fn relay_key(prefix: &str) -> String {
    format!("{}/@/alive", prefix)
}

fn entity_key(prefix: &str, entity: &str) -> String {
    format!("{}/@/{}/alive", prefix, entity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let prefix = "spBv1.0/1_8";
        assert_eq!(relay_key(prefix), "spBv1.0/1_8/@/alive");
        assert_eq!(entity_key(prefix, "agent1"), "spBv1.0/1_8/@/agent1/alive");
        assert_eq!(
            entity_key(prefix, "agent1/dev-123"),
            "spBv1.0/1_8/@/agent1/dev-123/alive"
        );
    }
}
