//! Configuration for the MTConnect to Sparkplug relay.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use mtc_spb_bridge_framework::{BridgeConfig, BridgeError, Result, TerminatorOptions};
use mtc_spb_common::{Format, LoggingConfig, MqttConfig, ZenohConfig};

use crate::model::DEFAULT_SAMPLE_BUFFER;
use crate::profile::ProfileKind;
use crate::sink::Transport;

/// Complete relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// MTConnect agent settings.
    pub agent: AgentConfig,

    /// Sparkplug destination settings.
    #[serde(default)]
    pub destination: DestinationConfig,

    /// Frame channel settings.
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Naming and identity profile.
    #[serde(default)]
    pub profile: ProfileKind,

    /// Automatic session termination.
    #[serde(default)]
    pub terminator: TerminatorOptions,

    /// How long workers get to finish after shutdown is requested.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// MTConnect agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent base URL, e.g. `http://localhost:5000`.
    pub url: String,

    /// Poll interval in milliseconds (default: 1000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// HTTP request timeout in milliseconds (default: 5000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Samples retained per data item (default: 100).
    #[serde(default = "default_sample_buffer")]
    pub sample_buffer: usize,
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_sample_buffer() -> usize {
    DEFAULT_SAMPLE_BUFFER
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

/// Sparkplug destination configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Transport carrying Sparkplug messages (default: mqtt).
    #[serde(default)]
    pub transport: Transport,

    /// Payload encoding (default: json).
    #[serde(default)]
    pub serialization: Format,

    /// Broker settings, used with the MQTT transport.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Session settings, used with the Zenoh transport.
    #[serde(default)]
    pub zenoh: ZenohConfig,
}

/// Frame channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Capacity of each of the four channels (default: 16).
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    16
}

impl RelayConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl BridgeConfig for RelayConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<()> {
        let url = self.agent.url.trim();
        if url.is_empty() {
            return Err(BridgeError::validation("agent.url must not be empty"));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(BridgeError::validation(format!(
                "agent.url must be an http(s) URL, got '{}'",
                url
            )));
        }
        if self.agent.poll_interval_ms == 0 {
            return Err(BridgeError::validation("agent.poll_interval_ms must be > 0"));
        }
        if self.agent.timeout_ms == 0 {
            return Err(BridgeError::validation("agent.timeout_ms must be > 0"));
        }
        if self.agent.sample_buffer == 0 {
            return Err(BridgeError::validation("agent.sample_buffer must be > 0"));
        }
        if self.channels.capacity == 0 {
            return Err(BridgeError::validation("channels.capacity must be > 0"));
        }
        if self.destination.transport == Transport::Mqtt {
            let mqtt = &self.destination.mqtt;
            if mqtt.host.is_empty() {
                return Err(BridgeError::validation(
                    "destination.mqtt.host must not be empty",
                ));
            }
            if mqtt.client_id.is_empty() {
                return Err(BridgeError::validation(
                    "destination.mqtt.client_id must not be empty",
                ));
            }
            if mqtt.request_capacity == 0 || mqtt.connect_timeout_ms == 0 {
                return Err(BridgeError::validation(
                    "destination.mqtt.request_capacity and connect_timeout_ms must be > 0",
                ));
            }
        }
        self.terminator.validate()
    }
}
