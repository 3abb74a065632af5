//! Sparkplug payload publisher for Zenoh.

use std::sync::Arc;

use mtc_spb_common::{Format, MessageType, Payload, TopicBuilder, encode};

use crate::error::{BridgeError, Result};

/// Publisher for sending Sparkplug payloads over Zenoh.
///
/// Sparkplug topics (`spBv1.0/<group>/<TYPE>/<node>[/<device>]`) are valid
/// Zenoh key expressions, so payloads are put directly on the topic.
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Arc<zenoh::Session>,
    format: Format,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(session: Arc<zenoh::Session>, format: Format) -> Self {
        Self { session, format }
    }

    /// Get the serialization format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Get a reference to the Zenoh session.
    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Publish a node-scoped payload (`NBIRTH`, `NDATA`, `NDEATH`).
    pub async fn publish_node(
        &self,
        topics: &TopicBuilder,
        kind: MessageType,
        payload: &Payload,
    ) -> Result<()> {
        let key = topics.node_topic(kind);
        self.publish(&key, payload).await
    }

    /// Publish a device-scoped payload (`DBIRTH`, `DDATA`, `DDEATH`).
    pub async fn publish_device(
        &self,
        topics: &TopicBuilder,
        kind: MessageType,
        device: &str,
        payload: &Payload,
    ) -> Result<()> {
        let key = topics
            .device_topic(kind, device)
            .map_err(|e| BridgeError::Publish {
                key: format!("{}/{}", topics.node_topic(kind), device),
                message: e.to_string(),
            })?;
        self.publish(&key, payload).await
    }

    /// Encode and publish a payload to a full key.
    pub async fn publish(&self, key: &str, payload: &Payload) -> Result<()> {
        let bytes =
            encode(payload, self.format).map_err(|e| BridgeError::Serialization(e.to_string()))?;
        self.publish_raw(key, bytes).await
    }

    /// Publish raw bytes to a key.
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        self.session
            .put(key, payload)
            .await
            .map_err(|e| BridgeError::Publish {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        tracing::trace!(key = %key, "Published");
        Ok(())
    }
}
