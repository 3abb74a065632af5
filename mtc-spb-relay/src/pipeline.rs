//! Relay wiring: channels, workers and the terminator.

use std::sync::Arc;

use tracing::info;

use mtc_spb_bridge_framework::{
    BridgeConfig, BridgeRunner, FrameSender, Result, TerminatorOptions, TerminatorService,
};

use crate::agent::AgentClient;
use crate::config::{DestinationConfig, RelayConfig};
use crate::frames::{DestinationOutbound, RelayChannels};
use crate::phase::PhaseTracker;
use crate::poller::Poller;
use crate::publisher::SparkplugPublisher;
use crate::sink::mqtt::MqttSink;
use crate::sink::zenoh::ZenohSink;
use crate::sink::{SparkplugSink, Transport};
use crate::translator::Translator;

/// Open the configured Sparkplug sink. Commands it receives are sent on
/// `commands`.
pub async fn connect_sink(
    destination: &DestinationConfig,
    commands: FrameSender<DestinationOutbound>,
) -> Result<Box<dyn SparkplugSink>> {
    let format = destination.serialization;

    match destination.transport {
        Transport::Mqtt => {
            info!(
                host = %destination.mqtt.host,
                port = destination.mqtt.port,
                format = ?format,
                "Using MQTT destination"
            );
            Ok(Box::new(MqttSink::new(
                destination.mqtt.clone(),
                format,
                commands,
            )))
        }
        Transport::Zenoh => {
            let session = mtc_spb_common::connect(&destination.zenoh).await?;
            info!(mode = %destination.zenoh.mode, format = ?format, "Using Zenoh destination");
            Ok(Box::new(ZenohSink::new(Arc::new(session), format, commands)))
        }
    }
}

/// The relay's three workers, connected by one set of channels.
pub struct Pipeline {
    channels: RelayChannels,
    phase: PhaseTracker,
    poller: Poller,
    translator: Translator,
    publisher: SparkplugPublisher,
}

impl Pipeline {
    /// Wire a relay session. `sink` must send its commands on
    /// `channels.destination_outbound`.
    pub fn new(
        config: &RelayConfig,
        channels: RelayChannels,
        client: Arc<dyn AgentClient>,
        sink: Box<dyn SparkplugSink>,
    ) -> Self {
        let phase = PhaseTracker::new();

        let poller = Poller::new(
            client,
            config.agent.poll_interval(),
            config.agent.sample_buffer,
            channels.source_outbound.sender(),
            channels.source_inbound.receiver(),
        )
        .with_phase(phase.clone());

        let translator = Translator::new(
            config.profile.build(),
            channels.source_outbound.receiver(),
            channels.destination_outbound.receiver(),
            channels.destination_inbound.sender(),
            channels.source_inbound.sender(),
        )
        .with_phase(phase.clone());

        let publisher = SparkplugPublisher::new(sink, channels.destination_inbound.receiver())
            .with_phase(phase.clone());

        Self {
            channels,
            phase,
            poller,
            translator,
            publisher,
        }
    }

    pub fn channels(&self) -> &RelayChannels {
        &self.channels
    }

    /// Phase of this session, shared by the workers.
    pub fn phase(&self) -> PhaseTracker {
        self.phase.clone()
    }

    /// Register the terminator and spawn the workers on `runner`.
    pub fn install<C: BridgeConfig>(self, runner: &mut BridgeRunner<C>, terminator: TerminatorOptions) {
        runner.add_service(TerminatorService::new(
            terminator,
            self.channels.closables(),
        ));

        runner.spawn("poller", self.poller.run());
        runner.spawn("translator", self.translator.run());
        runner.spawn("publisher", self.publisher.run());
    }
}
