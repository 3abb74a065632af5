//! Sparkplug B over MQTT.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use mtc_spb_bridge_framework::FrameSender;
use mtc_spb_common::{Format, MessageType, Metric, MqttConfig, Payload, TopicBuilder, encode};

use super::{
    PublishError, SequenceCounter, SparkplugSink, bd_seq_metric, death_payload, decode_commands,
};
use crate::frames::DestinationOutbound;
use crate::liveness::NodeIdentity;

/// Delay before polling the event loop again after a connection error.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// One MQTT connection, bound to a node identity.
struct Connection {
    identity: NodeIdentity,
    topics: TopicBuilder,
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    closing: Arc<AtomicBool>,
    listener: JoinHandle<()>,
}

/// Sparkplug sink publishing to an MQTT broker.
///
/// Connects lazily on the first `NBIRTH`, registering the `NDEATH` as the
/// connection's last will, and waits for the broker's CONNACK before the
/// birth goes out. Publishing waits for room in the client's request queue,
/// which the connection's event loop task drains. An explicit `NDEATH`
/// disconnects cleanly; the next `NBIRTH` opens a new connection with the
/// next `bdSeq`.
pub struct MqttSink {
    config: MqttConfig,
    format: Format,
    commands: FrameSender<DestinationOutbound>,
    connection: Option<Connection>,
    seq: SequenceCounter,
    bd_seq: u64,
}

impl MqttSink {
    pub fn new(
        config: MqttConfig,
        format: Format,
        commands: FrameSender<DestinationOutbound>,
    ) -> Self {
        Self {
            config,
            format,
            commands,
            connection: None,
            seq: SequenceCounter::default(),
            bd_seq: 0,
        }
    }

    /// Whether a connection is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    async fn connect(&mut self, node: &NodeIdentity) -> Result<(), PublishError> {
        if self
            .connection
            .as_ref()
            .is_some_and(|c| &c.identity != node)
        {
            tracing::info!(node = %node, "Node identity changed, reconnecting");
            self.disconnect();
        }

        if self.connection.is_none() {
            let topics = TopicBuilder::new(node.group.as_str(), node.node.as_str())?;
            let will = encode(&death_payload(self.bd_seq), self.format)?;

            let mut options =
                MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
            options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
            options.set_clean_session(true);
            options.set_last_will(LastWill::new(
                topics.node_topic(MessageType::NodeDeath),
                will,
                QoS::AtLeastOnce,
                false,
            ));

            let (client, eventloop) = AsyncClient::new(options, self.config.request_capacity);

            let (connected_tx, connected) = watch::channel(false);
            let closing = Arc::new(AtomicBool::new(false));
            let listener = tokio::spawn(listen(
                eventloop,
                node.clone(),
                self.commands.clone(),
                connected_tx,
                closing.clone(),
            ));

            tracing::info!(
                host = %self.config.host,
                port = self.config.port,
                node = %node,
                bd_seq = self.bd_seq,
                "MQTT session opened"
            );

            self.connection = Some(Connection {
                identity: node.clone(),
                topics,
                client,
                connected,
                closing,
                listener,
            });

            let conn = self.connection_for(node)?;
            subscribe(&conn.client, conn.topics.node_topic(MessageType::NodeCommand)).await?;
            subscribe(&conn.client, conn.topics.device_command_filter()).await?;
        }

        self.await_connected(node).await
    }

    /// Wait until the broker has acknowledged the connection.
    async fn await_connected(&self, node: &NodeIdentity) -> Result<(), PublishError> {
        let mut connected = self.connection_for(node)?.connected.clone();
        let timeout = self.config.connect_timeout();

        match tokio::time::timeout(timeout, connected.wait_for(|c| *c))
            .await
            .map(|r| r.is_ok())
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(PublishError::Transport(
                "MQTT event loop stopped".to_string(),
            )),
            Err(_) => Err(PublishError::Transport(format!(
                "no CONNACK from {}:{} within {} ms",
                self.config.host, self.config.port, self.config.connect_timeout_ms
            ))),
        }
    }

    fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.closing.store(true, Ordering::SeqCst);
            if let Err(e) = conn.client.try_disconnect() {
                tracing::debug!(error = %e, "MQTT disconnect request failed");
                conn.listener.abort();
            }
            self.bd_seq = self.bd_seq.wrapping_add(1);
        }
    }

    fn connection_for(&self, node: &NodeIdentity) -> Result<&Connection, PublishError> {
        self.connection
            .as_ref()
            .filter(|c| &c.identity == node)
            .ok_or(PublishError::NotBorn)
    }

    async fn send(
        &self,
        client: &AsyncClient,
        topic: String,
        payload: &Payload,
    ) -> Result<(), PublishError> {
        let bytes = encode(payload, self.format)?;
        client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, bytes)
            .await
            .map_err(|e| PublishError::Transport(format!("{}: {}", topic, e)))?;
        tracing::trace!(topic = %topic, metrics = payload.metrics.len(), "Published");
        Ok(())
    }
}

async fn subscribe(client: &AsyncClient, filter: String) -> Result<(), PublishError> {
    client
        .subscribe(filter.as_str(), QoS::AtLeastOnce)
        .await
        .map_err(|e| PublishError::Transport(format!("{}: {}", filter, e)))
}

#[async_trait]
impl SparkplugSink for MqttSink {
    async fn publish_node_birth(
        &mut self,
        node: &NodeIdentity,
        mut metrics: Vec<Metric>,
    ) -> Result<(), PublishError> {
        self.connect(node).await?;
        metrics.push(bd_seq_metric(self.bd_seq));
        self.seq.reset();
        let payload = Payload::new(Some(self.seq.next()), metrics);

        let conn = self.connection_for(node)?;
        self.send(&conn.client, conn.topics.node_topic(MessageType::NodeBirth), &payload)
            .await
    }

    async fn publish_device_birth(
        &mut self,
        node: &NodeIdentity,
        device: &str,
        metrics: Vec<Metric>,
    ) -> Result<(), PublishError> {
        let payload = Payload::new(Some(self.seq.next()), metrics);
        let conn = self.connection_for(node)?;
        let topic = conn.topics.device_topic(MessageType::DeviceBirth, device)?;
        self.send(&conn.client, topic, &payload).await
    }

    async fn publish_data(
        &mut self,
        node: &NodeIdentity,
        device: Option<&str>,
        metrics: Vec<Metric>,
    ) -> Result<(), PublishError> {
        let payload = Payload::new(Some(self.seq.next()), metrics);
        let conn = self.connection_for(node)?;
        let topic = match device {
            Some(device) => conn.topics.device_topic(MessageType::DeviceData, device)?,
            None => conn.topics.node_topic(MessageType::NodeData),
        };
        self.send(&conn.client, topic, &payload).await
    }

    async fn publish_node_death(&mut self, node: &NodeIdentity) -> Result<(), PublishError> {
        let payload = death_payload(self.bd_seq);
        let result = {
            let conn = self.connection_for(node)?;
            self.send(&conn.client, conn.topics.node_topic(MessageType::NodeDeath), &payload)
                .await
        };
        self.disconnect();
        result
    }

    async fn publish_device_death(
        &mut self,
        node: &NodeIdentity,
        device: &str,
    ) -> Result<(), PublishError> {
        let payload = Payload::new(Some(self.seq.next()), Vec::new());
        let conn = self.connection_for(node)?;
        let topic = conn.topics.device_topic(MessageType::DeviceDeath, device)?;
        self.send(&conn.client, topic, &payload).await
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Drive the MQTT event loop until the connection is closed.
///
/// Commands are forwarded while the command channel is open; after it
/// closes the loop keeps running so queued publishes still reach the broker.
async fn listen(
    mut eventloop: EventLoop,
    node: NodeIdentity,
    commands: FrameSender<DestinationOutbound>,
    connected: watch::Sender<bool>,
    closing: Arc<AtomicBool>,
) {
    let mut forwarding = true;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(publish))) if forwarding => {
                for command in decode_commands(&publish.topic, &publish.payload, &node) {
                    tracing::debug!(command = ?command, "Command received");
                    if commands
                        .send(DestinationOutbound::Command(command))
                        .await
                        .is_err()
                    {
                        tracing::debug!("Command channel closed, no longer forwarding commands");
                        forwarding = false;
                        break;
                    }
                }
            }
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                tracing::info!(node = %node, "MQTT connected");
                connected.send_replace(true);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!(node = %node, "MQTT disconnected");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                connected.send_replace(false);
                if closing.load(Ordering::SeqCst) {
                    return;
                }
                tracing::warn!(node = %node, error = %e, "MQTT connection error");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtc_spb_bridge_framework::FrameChannel;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn node() -> NodeIdentity {
        NodeIdentity {
            group: "1_7_0_3".to_string(),
            node: "agent1".to_string(),
        }
    }

    /// Topics of the PUBLISH packets a [`TestBroker`] received, in order.
    type Received = Arc<Mutex<Vec<String>>>;

    /// In-process MQTT 3.1.1 broker that acknowledges CONNECT, SUBSCRIBE,
    /// PINGREQ and QoS 1 PUBLISH packets and records publish topics.
    struct TestBroker {
        port: u16,
        received: Received,
    }

    impl TestBroker {
        async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let received = Received::default();

            let sink = received.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, sink.clone()));
                }
            });

            Self { port, received }
        }

        fn config(&self) -> MqttConfig {
            MqttConfig {
                host: "127.0.0.1".to_string(),
                port: self.port,
                ..MqttConfig::default()
            }
        }

        fn topics(&self) -> Vec<String> {
            self.received.lock().unwrap().clone()
        }

        async fn wait_for(&self, count: usize) -> Vec<String> {
            for _ in 0..200 {
                let topics = self.topics();
                if topics.len() >= count {
                    return topics;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("broker received {} publishes, expected {}", self.topics().len(), count);
        }
    }

    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    async fn serve(mut stream: TcpStream, received: Received) {
        while let Ok((header, body)) = read_packet(&mut stream).await {
            let reply = match header >> 4 {
                // CONNECT
                1 => vec![0x20, 0x02, 0x00, 0x00],
                // PUBLISH
                3 => {
                    let qos = (header >> 1) & 0x03;
                    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                    let topic = String::from_utf8_lossy(&body[2..2 + topic_len]).into_owned();
                    received.lock().unwrap().push(topic);
                    if qos > 0 {
                        vec![0x40, 0x02, body[2 + topic_len], body[3 + topic_len]]
                    } else {
                        Vec::new()
                    }
                }
                // SUBSCRIBE, one filter per request
                8 => vec![0x90, 0x03, body[0], body[1], 0x01],
                // PINGREQ
                12 => vec![0xd0, 0x00],
                // DISCONNECT
                14 => return,
                _ => Vec::new(),
            };
            if !reply.is_empty() && stream.write_all(&reply).await.is_err() {
                return;
            }
        }
    }

    fn sink(config: MqttConfig) -> MqttSink {
        let channel = FrameChannel::bounded("destination-outbound", 4);
        MqttSink::new(config, Format::Json, channel.sender())
    }

    #[tokio::test]
    async fn test_data_before_birth_is_rejected() {
        let mut sink = sink(MqttConfig::default());
        let result = sink.publish_data(&node(), None, Vec::new()).await;
        assert!(matches!(result, Err(PublishError::NotBorn)));
        assert!(!sink.is_connected());
    }

    #[tokio::test]
    async fn test_birth_opens_session_and_death_closes_it() {
        let broker = TestBroker::start().await;
        let mut sink = sink(broker.config());

        sink.publish_node_birth(&node(), Vec::new()).await.unwrap();
        assert!(sink.is_connected());
        sink.publish_device_birth(&node(), "dev-123", Vec::new())
            .await
            .unwrap();

        sink.publish_node_death(&node()).await.unwrap();
        assert!(!sink.is_connected());
        assert_eq!(sink.bd_seq, 1);

        let topics = broker.wait_for(3).await;
        assert_eq!(
            topics,
            vec![
                "spBv1.0/1_7_0_3/NBIRTH/agent1",
                "spBv1.0/1_7_0_3/DBIRTH/agent1/dev-123",
                "spBv1.0/1_7_0_3/NDEATH/agent1",
            ]
        );
    }

    #[tokio::test]
    async fn test_births_beyond_request_capacity_are_all_published() {
        let broker = TestBroker::start().await;
        let config = MqttConfig {
            request_capacity: 8,
            ..broker.config()
        };
        let mut sink = sink(config);

        sink.publish_node_birth(&node(), Vec::new()).await.unwrap();
        for i in 0..100 {
            sink.publish_device_birth(&node(), &format!("dev-{}", i), Vec::new())
                .await
                .unwrap();
        }

        let topics = broker.wait_for(101).await;
        assert_eq!(topics[0], "spBv1.0/1_7_0_3/NBIRTH/agent1");
        assert_eq!(topics[100], "spBv1.0/1_7_0_3/DBIRTH/agent1/dev-99");
    }

    #[tokio::test]
    async fn test_birth_without_broker_times_out() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout_ms: 50,
            ..MqttConfig::default()
        };
        let mut sink = sink(config);

        let result = sink.publish_node_birth(&node(), Vec::new()).await;
        assert!(matches!(result, Err(PublishError::Transport(_))));
        assert!(sink.is_connected());
    }

    #[tokio::test]
    async fn test_invalid_device_id_is_topic_error() {
        let broker = TestBroker::start().await;
        let mut sink = sink(broker.config());
        sink.publish_node_birth(&node(), Vec::new()).await.unwrap();
        let result = sink.publish_data(&node(), Some("a/b"), Vec::new()).await;
        assert!(matches!(result, Err(PublishError::Topic(_))));
    }
}
