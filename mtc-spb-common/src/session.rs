use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{Error, Result};

/// Build the native Zenoh configuration from the relay's settings.
pub fn build_zenoh_config(config: &ZenohConfig) -> Result<zenoh::Config> {
    let mut zenoh_config = zenoh::Config::default();

    match config.mode.as_str() {
        "client" | "peer" | "router" => {}
        other => {
            return Err(Error::Config(format!(
                "Invalid Zenoh mode: '{}'. Expected 'client', 'peer', or 'router'",
                other
            )));
        }
    }

    zenoh_config
        .insert_json5("mode", &format!("\"{}\"", config.mode))
        .map_err(|e| Error::Config(format!("Failed to set mode: {}", e)))?;

    insert_endpoints(&mut zenoh_config, "connect/endpoints", &config.connect)?;
    insert_endpoints(&mut zenoh_config, "listen/endpoints", &config.listen)?;

    Ok(zenoh_config)
}

fn insert_endpoints(zenoh_config: &mut zenoh::Config, key: &str, endpoints: &[String]) -> Result<()> {
    if endpoints.is_empty() {
        return Ok(());
    }

    let json = serde_json::to_string(endpoints)?;
    zenoh_config
        .insert_json5(key, &json)
        .map_err(|e| Error::Config(format!("Failed to set {}: {}", key, e)))
}

/// Connect to Zenoh using the provided configuration.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    let zenoh_config = build_zenoh_config(config)?;

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Connecting to Zenoh"
    );

    let session = zenoh::open(zenoh_config).await?;

    tracing::info!(zid = %session.zid(), "Connected to Zenoh");

    Ok(session)
}
