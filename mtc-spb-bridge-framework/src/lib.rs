//! MTConnect to Sparkplug B relay: bridge framework
//!
//! Common runtime pieces for the relay process.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing the process lifecycle (services, workers, shutdown)
//! - [`FrameChannel`] bounded channels connecting workers, closable via [`Closable`]
//! - [`TerminatorService`] for time-bounded sessions
//! - [`Publisher`] and [`LivelinessManager`] for publishing Sparkplug payloads over Zenoh
//! - [`BridgeArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use mtc_spb_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, FrameChannel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("relay.json5");
//!     let config = MyConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new_with_args("relay", config, Some(&args))?;
//!     let channel = FrameChannel::<String>::bounded("frames", 16);
//!     runner.spawn("consumer", consume(channel.receiver()));
//!
//!     // Run until Ctrl+C
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

mod args;
mod channels;
mod config;
mod error;
mod lifetime;
mod liveliness;
mod publisher;
mod runner;
mod terminator;

pub use args::BridgeArgs;
pub use channels::{Closable, FrameChannel, FrameReceiver, FrameSender};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use lifetime::{AppLifetime, HostedService};
pub use liveliness::LivelinessManager;
pub use publisher::Publisher;
pub use runner::{BridgeRunner, DEFAULT_SHUTDOWN_GRACE};
pub use terminator::{TerminatorOptions, TerminatorService};

// Re-export commonly used types from mtc-spb-common
pub use mtc_spb_common::{Format, LoggingConfig, MqttConfig, ZenohConfig};
