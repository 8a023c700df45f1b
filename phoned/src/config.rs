//! Daemon configuration.
//!
//! Loaded from TOML. Every section is optional; a missing file means
//! defaults from [`crate::constants`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{persistence, service, sync, timeouts};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "PHONED_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub timeouts: TimeoutConfig,
    pub sync: SyncConfig,
    pub bluetooth: BluetoothConfig,
    /// Where the last selected device is remembered. Defaults to `~/.phoned`.
    pub state_file: Option<PathBuf>,
}

impl Config {
    /// Loads from `$PHONED_CONFIG` when set, else from the default path.
    /// A missing default file yields defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load(PathBuf::from(path));
        }
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Checks that timeouts are non-zero and the service identity is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.service.validate());
        errors.extend(self.timeouts.validate());
        errors.extend(self.sync.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolved selection file path, if a home directory is known.
    pub fn state_file_path(&self) -> Option<PathBuf> {
        self.state_file
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(persistence::STATE_FILE_NAME)))
    }
}

/// Exported service identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bus_name: String,
    pub object_path: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bus_name: service::BUS_NAME.to_string(),
            object_path: service::OBJECT_PATH.to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.bus_name.trim().is_empty() {
            errors.push(ValidationError::new("service.bus_name", "must not be empty"));
        }
        if !self.object_path.starts_with('/') {
            errors.push(ValidationError::new(
                "service.object_path",
                format!("'{}' is not an absolute object path", self.object_path),
            ));
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub stalled_transfer_secs: u64,
    pub modem_watchdog_secs: u64,
    pub call_history_refresh_delay_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            stalled_transfer_secs: timeouts::STALLED_TRANSFER_SECS,
            modem_watchdog_secs: timeouts::MODEM_WATCHDOG_SECS,
            call_history_refresh_delay_ms: timeouts::CALL_HISTORY_REFRESH_DELAY_MS,
        }
    }
}

impl TimeoutConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let fields = [
            ("timeouts.stalled_transfer_secs", self.stalled_transfer_secs),
            ("timeouts.modem_watchdog_secs", self.modem_watchdog_secs),
            (
                "timeouts.call_history_refresh_delay_ms",
                self.call_history_refresh_delay_ms,
            ),
        ];
        fields
            .iter()
            .filter(|(_, value)| *value == 0)
            .map(|(field, _)| ValidationError::new(field, "must be greater than zero"))
            .collect()
    }

    pub fn stalled_transfer(&self) -> Duration {
        Duration::from_secs(self.stalled_transfer_secs)
    }

    pub fn modem_watchdog(&self) -> Duration {
        Duration::from_secs(self.modem_watchdog_secs)
    }

    pub fn call_history_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.call_history_refresh_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Entries pulled by the refresh that follows a finished call.
    pub call_history_refresh_count: u16,
    pub vcard_format: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            call_history_refresh_count: sync::CALL_HISTORY_REFRESH_COUNT,
            vcard_format: sync::VCARD_FORMAT.to_string(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !matches!(self.vcard_format.as_str(), "vcard21" | "vcard30") {
            errors.push(ValidationError::new(
                "sync.vcard_format",
                format!("'{}' is not vcard21 or vcard30", self.vcard_format),
            ));
        }
        errors
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Unblock the Bluetooth technology and power the adapter at startup.
    pub power_on_start: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid configuration:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// One rejected field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("phoned")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.service.bus_name, "org.tizen.phone");
        assert_eq!(config.service.object_path, "/");
        assert_eq!(config.timeouts.stalled_transfer(), Duration::from_secs(120));
        assert_eq!(config.timeouts.modem_watchdog(), Duration::from_secs(60));
        assert_eq!(
            config.timeouts.call_history_refresh_delay(),
            Duration::from_millis(5000)
        );
        assert_eq!(config.sync.call_history_refresh_count, 10);
        assert_eq!(config.sync.vcard_format, "vcard30");
        assert!(!config.bluetooth.power_on_start);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [timeouts]
            stalled_transfer_secs = 30

            [bluetooth]
            power_on_start = true
            "#,
        )
        .unwrap();
        assert_eq!(config.timeouts.stalled_transfer_secs, 30);
        assert_eq!(config.timeouts.modem_watchdog_secs, 60);
        assert!(config.bluetooth.power_on_start);
        assert_eq!(config.service, ServiceConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.sync.call_history_refresh_count = 25;
        config.state_file = Some(dir.path().join("selected"));
        config.save(&path).unwrap();

        let loaded = Config::load_validated(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Read { .. })));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[timeouts\nstalled_transfer_secs = ").unwrap();
        assert!(matches!(Config::load(&broken), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validation_collects_every_field() {
        let mut config = Config::default();
        config.service.bus_name = " ".into();
        config.service.object_path = "phone".into();
        config.timeouts.stalled_transfer_secs = 0;
        config.timeouts.call_history_refresh_delay_ms = 0;
        config.sync.vcard_format = "csv".into();

        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation failure");
        };
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "service.bus_name",
                "service.object_path",
                "timeouts.stalled_transfer_secs",
                "timeouts.call_history_refresh_delay_ms",
                "sync.vcard_format",
            ]
        );

        let message = ConfigError::Validation(errors).to_string();
        assert!(message.contains("  - timeouts.stalled_transfer_secs: must be greater than zero"));
    }

    #[test]
    fn test_state_file_override() {
        let config = Config {
            state_file: Some(PathBuf::from("/tmp/selected")),
            ..Config::default()
        };
        assert_eq!(config.state_file_path(), Some(PathBuf::from("/tmp/selected")));
    }
}
