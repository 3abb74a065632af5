//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::LoggingConfig;
use crate::error::{BridgeError, Result};

/// Trait for bridge configuration types.
///
/// Implement this trait for your bridge's configuration struct to get
/// automatic loading, validation, and access to common config fields.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use mtc_spb_bridge_framework::{BridgeConfig, BridgeError, LoggingConfig, Result};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyBridgeConfig {
///     pub logging: LoggingConfig,
///     pub poll_interval_ms: u64,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn validate(&self) -> Result<()> {
///         if self.poll_interval_ms == 0 {
///             return Err(BridgeError::validation("poll_interval_ms must be > 0"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Parse configuration from a JSON5 string and validate it.
    fn from_json5(content: &str) -> Result<Self> {
        let config: Self = mtc_spb_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_json5(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        logging: LoggingConfig,
        poll_interval_ms: u64,
    }

    impl BridgeConfig for TestConfig {
        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn validate(&self) -> Result<()> {
            if self.poll_interval_ms == 0 {
                return Err(BridgeError::validation("poll_interval_ms must be > 0"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(BridgeError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_from_json5_validates() {
        let config = TestConfig::from_json5("{ poll_interval_ms: 500 }").unwrap();
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.logging().level, "info");

        let result = TestConfig::from_json5("{ poll_interval_ms: 0 }");
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_from_json5_parse_error() {
        let result = TestConfig::from_json5("{ poll_interval_ms: }");
        assert!(matches!(result, Err(BridgeError::ConfigParse(_))));
    }
}
