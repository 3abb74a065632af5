//! MTConnect to Sparkplug B relay: common library
//!
//! This crate provides shared types and utilities for the relay:
//!
//! - [`metric`] - Sparkplug metric data model (`Metric`, `MetricValue`, `PropertySet`, `Payload`)
//! - [`topic`] - Sparkplug topic builder and parser
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`config`] - Shared configuration types (JSON5 format)
//! - [`session`] - Zenoh session management
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod metric;
pub mod serialization;
pub mod session;
pub mod topic;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, MqttConfig, ZenohConfig, parse_config};
pub use error::{Error, Result};
pub use metric::{
    BD_SEQ_METRIC, DataType, Metric, MetricValue, Payload, PropertySet, REBIRTH_METRIC,
    current_timestamp_millis,
};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::connect;
pub use topic::{MessageType, NAMESPACE, ParsedTopic, TopicBuilder, parse_topic};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
