//! Sparkplug B over Zenoh.
//!
//! Payloads are put on the Sparkplug topic strings used as key expressions.
//! Zenoh has no last will, so born nodes and devices also hold liveliness
//! tokens; subscribers observe their deletion when the relay dies.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use zenoh::Session;

use mtc_spb_bridge_framework::{FrameSender, LivelinessManager, Publisher};
use mtc_spb_common::{Format, MessageType, Metric, NAMESPACE, Payload, TopicBuilder};

use super::{
    PublishError, SequenceCounter, SparkplugSink, bd_seq_metric, death_payload, decode_commands,
};
use crate::frames::DestinationOutbound;
use crate::liveness::NodeIdentity;

struct NodeSession {
    identity: NodeIdentity,
    topics: TopicBuilder,
    liveliness: LivelinessManager,
    listener: JoinHandle<()>,
}

/// Sparkplug sink publishing on a Zenoh session.
pub struct ZenohSink {
    session: Arc<Session>,
    publisher: Publisher,
    commands: FrameSender<DestinationOutbound>,
    node: Option<NodeSession>,
    seq: SequenceCounter,
    bd_seq: u64,
}

impl ZenohSink {
    pub fn new(
        session: Arc<Session>,
        format: Format,
        commands: FrameSender<DestinationOutbound>,
    ) -> Self {
        Self {
            publisher: Publisher::new(session.clone(), format),
            session,
            commands,
            node: None,
            seq: SequenceCounter::default(),
            bd_seq: 0,
        }
    }

    async fn open(&mut self, node: &NodeIdentity) -> Result<(), PublishError> {
        if self.node.as_ref().is_some_and(|s| &s.identity != node) {
            tracing::info!(node = %node, "Node identity changed, ending previous session");
            self.close().await;
        }

        if self.node.is_some() {
            return Ok(());
        }

        let topics = TopicBuilder::new(node.group.as_str(), node.node.as_str())?;
        let liveliness =
            LivelinessManager::new(self.session.clone(), format!("{}/{}", NAMESPACE, node.group))
                .await?;

        let listener = tokio::spawn(listen(
            self.session.clone(),
            command_keys(&topics),
            node.clone(),
            self.commands.clone(),
        ));

        self.node = Some(NodeSession {
            identity: node.clone(),
            topics,
            liveliness,
            listener,
        });
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(session) = self.node.take() {
            session.liveliness.undeclare_all().await;
            session.listener.abort();
            self.bd_seq = self.bd_seq.wrapping_add(1);
        }
    }

    fn session_for(&self, node: &NodeIdentity) -> Result<&NodeSession, PublishError> {
        self.node
            .as_ref()
            .filter(|s| &s.identity == node)
            .ok_or(PublishError::NotBorn)
    }
}

#[async_trait]
impl SparkplugSink for ZenohSink {
    async fn publish_node_birth(
        &mut self,
        node: &NodeIdentity,
        mut metrics: Vec<Metric>,
    ) -> Result<(), PublishError> {
        self.open(node).await?;
        metrics.push(bd_seq_metric(self.bd_seq));
        self.seq.reset();
        let payload = Payload::new(Some(self.seq.next()), metrics);

        let session = self.session_for(node)?;
        self.publisher
            .publish_node(&session.topics, MessageType::NodeBirth, &payload)
            .await?;
        session.liveliness.declare_alive(&node.node).await?;
        Ok(())
    }

    async fn publish_device_birth(
        &mut self,
        node: &NodeIdentity,
        device: &str,
        metrics: Vec<Metric>,
    ) -> Result<(), PublishError> {
        let payload = Payload::new(Some(self.seq.next()), metrics);
        let session = self.session_for(node)?;
        self.publisher
            .publish_device(&session.topics, MessageType::DeviceBirth, device, &payload)
            .await?;
        session
            .liveliness
            .declare_alive(&format!("{}/{}", node.node, device))
            .await?;
        Ok(())
    }

    async fn publish_data(
        &mut self,
        node: &NodeIdentity,
        device: Option<&str>,
        metrics: Vec<Metric>,
    ) -> Result<(), PublishError> {
        let payload = Payload::new(Some(self.seq.next()), metrics);
        let session = self.session_for(node)?;
        match device {
            Some(device) => {
                self.publisher
                    .publish_device(&session.topics, MessageType::DeviceData, device, &payload)
                    .await?
            }
            None => {
                self.publisher
                    .publish_node(&session.topics, MessageType::NodeData, &payload)
                    .await?
            }
        }
        Ok(())
    }

    async fn publish_node_death(&mut self, node: &NodeIdentity) -> Result<(), PublishError> {
        let payload = death_payload(self.bd_seq);
        let result = match self.session_for(node) {
            Ok(session) => self
                .publisher
                .publish_node(&session.topics, MessageType::NodeDeath, &payload)
                .await
                .map_err(PublishError::from),
            Err(e) => return Err(e),
        };
        self.close().await;
        result
    }

    async fn publish_device_death(
        &mut self,
        node: &NodeIdentity,
        device: &str,
    ) -> Result<(), PublishError> {
        let payload = Payload::new(Some(self.seq.next()), Vec::new());
        let session = self.session_for(node)?;
        session
            .liveliness
            .undeclare(&format!("{}/{}", node.node, device))
            .await;
        self.publisher
            .publish_device(&session.topics, MessageType::DeviceDeath, device, &payload)
            .await?;
        Ok(())
    }
}

/// Key expressions for `NCMD` and every `DCMD` addressed to the node.
fn command_keys(topics: &TopicBuilder) -> [String; 2] {
    [
        topics.node_topic(MessageType::NodeCommand),
        format!("{}/*", topics.node_topic(MessageType::DeviceCommand)),
    ]
}

async fn listen(
    session: Arc<Session>,
    keys: [String; 2],
    node: NodeIdentity,
    commands: FrameSender<DestinationOutbound>,
) {
    let [ncmd_key, dcmd_key] = keys;

    let (ncmd, dcmd) = match (
        session.declare_subscriber(ncmd_key.as_str()).await,
        session.declare_subscriber(dcmd_key.as_str()).await,
    ) {
        (Ok(ncmd), Ok(dcmd)) => (ncmd, dcmd),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(node = %node, error = %e, "Failed to subscribe to commands");
            return;
        }
    };

    tracing::debug!(ncmd = %ncmd_key, dcmd = %dcmd_key, "Listening for commands");

    loop {
        let sample = tokio::select! {
            sample = ncmd.recv_async() => sample,
            sample = dcmd.recv_async() => sample,
        };

        let sample = match sample {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!(node = %node, error = %e, "Command subscription ended");
                return;
            }
        };

        let payload = sample.payload().to_bytes();
        for command in decode_commands(sample.key_expr().as_str(), &payload, &node) {
            tracing::debug!(command = ?command, "Command received");
            if commands
                .send(DestinationOutbound::Command(command))
                .await
                .is_err()
            {
                tracing::debug!("Command channel closed, stopping Zenoh listener");
                return;
            }
        }
    }
}
