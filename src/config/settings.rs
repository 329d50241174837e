//! Application settings

use super::ConfigError;
use crate::core::meter::{ErrorPolicy, PollOptions, DEFAULT_SLAVE_ADDRESS, DEFAULT_TIMEOUT_MS};
use crate::core::transport::{SerialConfig, SerialFlowControl, SerialParity};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial line parameters
    pub serial: SerialSettings,
    /// Meter addressing and polling
    pub meter: MeterSettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration
    ///
    /// An explicit `path` must exist. Without one, the file in the user's
    /// config directory is used if present; otherwise defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => path.to_path_buf(),
            None => match super::default_config_path() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::debug!("no config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
            path: config_path.clone(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: config_path.clone(),
            source,
        })?;
        config.validate()?;

        tracing::debug!("loaded config from {}", config_path.display());
        Ok(config)
    }

    /// Save config to file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.meter.address == 0 || self.meter.address > 247 {
            return Err(ConfigError::Invalid(format!(
                "meter.address must be 1-247, got {}",
                self.meter.address
            )));
        }
        if self.meter.timeout_ms == 0 {
            return Err(ConfigError::Invalid("meter.timeout_ms must be non-zero".to_string()));
        }
        self.serial
            .to_serial_config("-")
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Serial line parameters (the device path comes from the command line)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits
    pub data_bits: u8,
    /// Stop bits
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
}

impl SerialSettings {
    /// Serial configuration for `port`
    pub fn to_serial_config(&self, port: &str) -> SerialConfig {
        SerialConfig::new(port, self.baud_rate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
            .flow_control(self.flow_control)
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: SerialConfig::DEFAULT_BAUD_RATE,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
        }
    }
}

/// Meter addressing and polling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterSettings {
    /// Modbus slave address
    pub address: u8,
    /// Per-read timeout in milliseconds
    pub timeout_ms: u64,
    /// Failure handling
    pub policy: ErrorPolicy,
}

impl MeterSettings {
    /// Poll options for a session
    pub fn poll_options(&self) -> PollOptions {
        PollOptions::new(self.timeout_ms).policy(self.policy)
    }
}

impl Default for MeterSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_SLAVE_ADDRESS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            policy: ErrorPolicy::Lenient,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (`RUST_LOG` takes precedence)
    pub level: String,
    /// Emit JSON lines instead of plain text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.meter.address, 1);
        assert_eq!(config.meter.timeout_ms, 3000);
        assert_eq!(config.meter.policy, ErrorPolicy::Lenient);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [serial]
            baud_rate = 19200
            parity = "even"

            [meter]
            policy = "strict"
            "#,
        )
        .unwrap();

        assert_eq!(config.serial.baud_rate, 19200);
        assert_eq!(config.serial.parity, SerialParity::Even);
        assert_eq!(config.serial.data_bits, 8);
        assert_eq!(config.meter.policy, ErrorPolicy::Strict);
        assert_eq!(config.meter.address, 1);
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = AppConfig::default();
        config.meter.address = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.serial.data_bits = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_options() {
        let settings = MeterSettings {
            address: 3,
            timeout_ms: 500,
            policy: ErrorPolicy::Strict,
        };
        assert_eq!(settings.poll_options(), PollOptions::new(500).strict());
    }
}
