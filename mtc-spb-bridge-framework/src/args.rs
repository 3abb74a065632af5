//! CLI argument parsing for bridges.

use std::path::PathBuf;

use clap::Parser;

/// Common CLI arguments for bridges.
#[derive(Parser, Debug, Clone)]
#[command(about = "MTConnect to Sparkplug B relay")]
pub struct BridgeArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override the auto-termination delay in milliseconds.
    #[arg(long)]
    pub terminate_after_ms: Option<u64>,
}

impl BridgeArgs {
    /// Parse CLI arguments with a default config path.
    ///
    /// If no `--config` argument is provided, uses the default.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        let matches = <Self as clap::CommandFactory>::command()
            .mut_arg("config", |arg| arg.default_value(default_config))
            .get_matches();

        <Self as clap::FromArgMatches>::from_arg_matches(&matches)
            .unwrap_or_else(|e| e.exit())
    }

    /// Parse CLI arguments (requires --config to be specified).
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_from_argv() {
        let args = BridgeArgs::try_parse_from([
            "mtc-spb-relay",
            "--config",
            "relay.json5",
            "--log-level",
            "debug",
            "--terminate-after-ms",
            "30000",
        ])
        .unwrap();

        assert_eq!(args.config, PathBuf::from("relay.json5"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.terminate_after_ms, Some(30000));
    }

    #[test]
    fn test_config_is_required() {
        assert!(BridgeArgs::try_parse_from(["mtc-spb-relay"]).is_err());
    }
}
