//! MTConnect to Sparkplug B relay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use mtc_spb_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, TerminatorOptions};
use mtc_spb_relay::agent::HttpAgentClient;
use mtc_spb_relay::config::RelayConfig;
use mtc_spb_relay::frames::RelayChannels;
use mtc_spb_relay::pipeline::{Pipeline, connect_sink};

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("mtc-spb-relay.json5");

    let mut config = RelayConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if let Some(ms) = args.terminate_after_ms {
        config.terminator = TerminatorOptions::after(Duration::from_millis(ms));
        config.validate().context("Invalid --terminate-after-ms")?;
    }

    let grace = config.shutdown_grace();
    let mut runner = BridgeRunner::new_with_args("mtc-spb-relay", config, Some(&args))
        .context("Failed to initialize relay")?
        .with_shutdown_grace(grace);

    let config = runner.config().clone();
    info!(
        agent = %config.agent.url,
        interval_ms = config.agent.poll_interval_ms,
        transport = ?config.destination.transport,
        profile = ?config.profile,
        "Relay configured"
    );

    let channels = RelayChannels::new(config.channels.capacity);

    let client = HttpAgentClient::new(config.agent.url.as_str(), config.agent.timeout())
        .context("Failed to create agent client")?;

    let sink = connect_sink(
        &config.destination,
        channels.destination_outbound.sender(),
    )
    .await
    .context("Failed to open Sparkplug destination")?;

    Pipeline::new(&config, channels, Arc::new(client), sink).install(&mut runner, config.terminator);

    runner.run().await.context("Relay failed")?;
    Ok(())
}
