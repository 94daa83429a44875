use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelOptions;
use crate::device::ScannerOptions;
use crate::serial::SerialSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("Invalid config {path}: {source}")]
    Parse { path: String, source: serde_json::Error },

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Everything needed to open a link: line settings, channel tuning, scanner tuning.
///
/// Loaded from JSON; every section and field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub serial: SerialSettings,
    pub channel: ChannelOptions,
    pub scanner: ScannerOptions,
}

impl LinkConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|source| ConfigError::Parse { path: "<inline>".to_string(), source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: display.clone(), source })?;
        let config: Self =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path: display.clone(), source })?;
        config.validate()?;
        log::debug!("Loaded link config from {}", display);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be positive".into()));
        }
        if !(5..=8).contains(&self.serial.data_bits) {
            return Err(ConfigError::Invalid(format!("data_bits must be 5-8, got {}", self.serial.data_bits)));
        }
        if !(1..=2).contains(&self.serial.stop_bits) {
            return Err(ConfigError::Invalid(format!("stop_bits must be 1 or 2, got {}", self.serial.stop_bits)));
        }
        if self.channel.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".into()));
        }
        if self.channel.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::Parity;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(LinkConfig::from_json("{}").unwrap(), LinkConfig::default());
    }

    #[test]
    fn partial_sections() {
        let cfg = LinkConfig::from_json(r#"{"serial":{"baud_rate":57600,"parity":"odd"},"channel":{"chunk_size":256}}"#)
            .unwrap();
        assert_eq!(cfg.serial.baud_rate, 57600);
        assert_eq!(cfg.serial.parity, Parity::Odd);
        assert_eq!(cfg.channel.chunk_size, 256);
        assert_eq!(cfg.channel.poll_interval_ms, 2);
        assert_eq!(cfg.scanner.interval_ms, 1000);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(LinkConfig::from_json(r#"{"serial":{"baud_rate":0}}"#), Err(ConfigError::Invalid(_))));
        assert!(matches!(LinkConfig::from_json(r#"{"channel":{"chunk_size":0}}"#), Err(ConfigError::Invalid(_))));
        assert!(matches!(LinkConfig::from_json("not json"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(LinkConfig::load("/nonexistent/joycore-link.json"), Err(ConfigError::Read { .. })));
    }
}
