use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::models::{
    AxisId, DEFAULT_FEEDRATE, DEFAULT_MOVE_TIMEOUT, IDLE_POLL_INTERVAL, MovementDefaults,
    SEQUENCE_STEP_TIMEOUT,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration file: {source}")]
    ReadError { source: std::io::Error },

    #[error("Failed to parse configuration: {source}")]
    ParseError { source: toml::de::Error },

    #[error("Failed to serialize configuration: {source}")]
    SerializeError { source: toml::ser::Error },

    #[error("Failed to write configuration file: {source}")]
    WriteError { source: std::io::Error },

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Axes registered at startup.
    pub axes: Vec<AxisId>,
    pub hardware: HardwareConfig,
    pub movement: MovementConfig,
    pub socket: SocketConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            axes: vec![AxisId::from("main")],
            hardware: HardwareConfig::default(),
            movement: MovementConfig::default(),
            socket: SocketConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hardware.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "hardware.base_url must not be empty".to_string(),
            });
        }

        if !self.movement.default_feedrate.is_finite() || self.movement.default_feedrate <= 0.0 {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "movement.default_feedrate must be positive, got {}",
                    self.movement.default_feedrate
                ),
            });
        }

        if self.movement.idle_poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "movement.idle_poll_interval_ms must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub base_url: String,
    pub move_path: String,
    pub abort_path: String,
    pub request_timeout_ms: u64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            move_path: "/api/cnc/move-relative".to_string(),
            abort_path: "/api/cnc/jog-cancel".to_string(),
            request_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    pub default_feedrate: f64,
    pub default_timeout_ms: u64,
    pub sequence_step_timeout_ms: u64,
    pub idle_poll_interval_ms: u64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            default_feedrate: DEFAULT_FEEDRATE,
            default_timeout_ms: DEFAULT_MOVE_TIMEOUT.as_millis() as u64,
            sequence_step_timeout_ms: SEQUENCE_STEP_TIMEOUT.as_millis() as u64,
            idle_poll_interval_ms: IDLE_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl MovementConfig {
    pub fn defaults(&self) -> MovementDefaults {
        MovementDefaults {
            feedrate: self.default_feedrate,
            timeout: Duration::from_millis(self.default_timeout_ms),
            sequence_step_timeout: Duration::from_millis(self.sequence_step_timeout_ms),
            idle_poll_interval: Duration::from_millis(self.idle_poll_interval_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub socket_path: PathBuf,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/cnc_coordinator.sock"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    pub level: String,
    pub json: bool,
    /// Daily rolling log files are written here when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

#[derive(Debug)]
pub struct ConfigOptions {
    pub config_path: PathBuf,
    pub create_if_missing: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            create_if_missing: true,
        }
    }
}

impl ConfigOptions {
    pub fn default_config_path() -> PathBuf {
        std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("default_config.toml"))
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    options: ConfigOptions,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            options: ConfigOptions::default(),
        }
    }

    pub fn with_options(options: ConfigOptions) -> Self {
        Self { options }
    }

    pub fn path(&self) -> &Path {
        &self.options.config_path
    }

    pub fn load(&self) -> anyhow::Result<Config> {
        let config_path = &self.options.config_path;

        if !config_path.exists() {
            if !self.options.create_if_missing {
                return Err(ConfigError::FileNotFound {
                    path: config_path.clone(),
                }
                .into());
            }

            let default_config = Config::default();
            self.save(&default_config)
                .context("Failed to save default config")?;
            return Ok(default_config);
        }

        let content =
            fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError { source: e })?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError { source: e })?;
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, config: &Config) -> anyhow::Result<()> {
        let config_path = &self.options.config_path;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(config_path, content).map_err(|e| ConfigError::WriteError { source: e })?;

        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

pub fn init_config() -> anyhow::Result<(ConfigManager, Config)> {
    init_config_with_options(ConfigOptions::default())
}

pub fn init_config_with_options(options: ConfigOptions) -> anyhow::Result<(ConfigManager, Config)> {
    let manager = ConfigManager::with_options(options);
    let config = manager.load()?;
    Ok((manager, config))
}

pub fn create_default_config<P: AsRef<Path>>(path: Option<P>) -> anyhow::Result<()> {
    let config_path = path
        .map(|p| p.as_ref().to_path_buf())
        .unwrap_or_else(ConfigOptions::default_config_path);

    let manager = ConfigManager::with_options(ConfigOptions {
        config_path,
        create_if_missing: true,
    });
    manager.save(&Config::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "cnc_coordinator_config_{}_{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = scratch_dir("create");
        let path = dir.join("nested").join("config.toml");

        let (manager, config) = init_config_with_options(ConfigOptions::with_path(&path)).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(manager.path(), path.as_path());
        assert!(path.exists());

        let reloaded = manager.load().unwrap();
        assert_eq!(reloaded, Config::default());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_file_without_create_is_an_error() {
        let dir = scratch_dir("missing");
        let options = ConfigOptions {
            config_path: dir.join("config.toml"),
            create_if_missing: false,
        };

        let err = ConfigManager::with_options(options).load().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            axes = ["gantry", "spindle"]

            [hardware]
            base_url = "http://cnc.local:9000"

            [movement]
            default_feedrate = 800.0
            "#,
        )
        .unwrap();

        assert_eq!(config.axes, vec![AxisId::from("gantry"), AxisId::from("spindle")]);
        assert_eq!(config.hardware.base_url, "http://cnc.local:9000");
        assert_eq!(config.hardware.move_path, "/api/cnc/move-relative");
        assert_eq!(config.movement.default_feedrate, 800.0);

        let defaults = config.movement.defaults();
        assert_eq!(defaults.feedrate, 800.0);
        assert_eq!(defaults.timeout, DEFAULT_MOVE_TIMEOUT);
        assert_eq!(defaults.sequence_step_timeout, SEQUENCE_STEP_TIMEOUT);
        assert_eq!(defaults.idle_poll_interval, IDLE_POLL_INTERVAL);
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut config = Config::default();
        config.movement.default_feedrate = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));

        let mut config = Config::default();
        config.movement.idle_poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.hardware.base_url = " ".to_string();
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn invalid_file_is_rejected_on_load() {
        let dir = scratch_dir("invalid");
        let path = dir.join("config.toml");
        fs::create_dir_all(&dir).unwrap();
        fs::write(&path, "[movement]\nidle_poll_interval_ms = 0\n").unwrap();

        let err = ConfigManager::with_options(ConfigOptions::with_path(&path))
            .load()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ValidationError { .. })
        ));

        fs::remove_dir_all(dir).unwrap();
    }
}
