//! Sparkplug B sinks.
//!
//! A [`SparkplugSink`] publishes BIRTH, DATA and DEATH messages for one edge
//! node and its devices, and forwards inbound `NCMD`/`DCMD` commands to the
//! destination-outbound channel. Two transports are provided:
//!
//! - [`mqtt::MqttSink`] - a Sparkplug MQTT client (rumqttc)
//! - [`zenoh::ZenohSink`] - the same topics as Zenoh key expressions

pub mod mqtt;
pub mod zenoh;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mtc_spb_bridge_framework::BridgeError;
use mtc_spb_common::{
    BD_SEQ_METRIC, MessageType, Metric, MetricValue, Payload, REBIRTH_METRIC, decode_auto,
    parse_topic,
};

use crate::frames::Command;
use crate::liveness::NodeIdentity;

/// Errors publishing to the Sparkplug side.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Invalid topic: {0}")]
    Topic(String),

    #[error("Failed to encode payload: {0}")]
    Encode(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No node is born on this sink")]
    NotBorn,
}

impl From<mtc_spb_common::Error> for PublishError {
    fn from(err: mtc_spb_common::Error) -> Self {
        match err {
            mtc_spb_common::Error::Topic(msg) => PublishError::Topic(msg),
            mtc_spb_common::Error::Json(e) => PublishError::Encode(e.to_string()),
            mtc_spb_common::Error::Cbor(msg) => PublishError::Encode(msg),
            other => PublishError::Transport(other.to_string()),
        }
    }
}

impl From<BridgeError> for PublishError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Serialization(msg) => PublishError::Encode(msg),
            other => PublishError::Transport(other.to_string()),
        }
    }
}

/// Destination transport selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Mqtt,
    Zenoh,
}

/// Publishes Sparkplug messages for one edge node at a time.
///
/// Publishing an `NBIRTH` for a different node identity ends the previous
/// node session.
#[async_trait]
pub trait SparkplugSink: Send {
    async fn publish_node_birth(
        &mut self,
        node: &NodeIdentity,
        metrics: Vec<Metric>,
    ) -> Result<(), PublishError>;

    async fn publish_device_birth(
        &mut self,
        node: &NodeIdentity,
        device: &str,
        metrics: Vec<Metric>,
    ) -> Result<(), PublishError>;

    /// Publish `NDATA` when `device` is `None`, `DDATA` otherwise.
    async fn publish_data(
        &mut self,
        node: &NodeIdentity,
        device: Option<&str>,
        metrics: Vec<Metric>,
    ) -> Result<(), PublishError>;

    async fn publish_node_death(&mut self, node: &NodeIdentity) -> Result<(), PublishError>;

    async fn publish_device_death(
        &mut self,
        node: &NodeIdentity,
        device: &str,
    ) -> Result<(), PublishError>;
}

/// Sparkplug message sequence number: 0-255, wrapping, reset on `NBIRTH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequenceCounter {
    next: u8,
}

impl SequenceCounter {
    /// Take the next sequence number.
    pub fn next(&mut self) -> u8 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }
}

/// `NDEATH` payload carrying the session's birth/death sequence.
pub fn death_payload(bd_seq: u64) -> Payload {
    Payload::new(None, vec![bd_seq_metric(bd_seq)])
}

pub(crate) fn bd_seq_metric(bd_seq: u64) -> Metric {
    Metric::new(
        BD_SEQ_METRIC,
        mtc_spb_common::DataType::Int64,
        MetricValue::Int((bd_seq % 256) as i64),
    )
}

/// Decode the commands carried by an inbound message addressed to `node`.
///
/// Messages that are not `NCMD`/`DCMD` for this node, or whose payload
/// cannot be decoded, yield no commands.
pub fn decode_commands(topic: &str, payload: &[u8], node: &NodeIdentity) -> Vec<Command> {
    let Some(parsed) = parse_topic(topic) else {
        tracing::debug!(topic = %topic, "Ignoring message on non-Sparkplug topic");
        return Vec::new();
    };

    if !matches!(
        parsed.kind,
        MessageType::NodeCommand | MessageType::DeviceCommand
    ) || parsed.group != node.group
        || parsed.node != node.node
    {
        return Vec::new();
    }

    let payload: Payload = match decode_auto(payload) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "Failed to decode command payload");
            return Vec::new();
        }
    };

    let device = parsed.device.map(str::to_string);

    payload
        .metrics
        .into_iter()
        .map(|metric| {
            if device.is_none()
                && metric.name == REBIRTH_METRIC
                && metric.value.as_bool() == Some(true)
            {
                Command::Rebirth
            } else {
                Command::Write {
                    device: device.clone(),
                    metric: metric.name,
                    value: metric.value,
                }
            }
        })
        .collect()
}
