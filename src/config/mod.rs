//! TOML configuration: `config.toml`, falling back to `config.default.toml`.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::common::RadioError;
use crate::queue::QueueConfig;
use crate::session::settings::RadioSettings;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub generation: QueueConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RadioConfig {
    #[serde(default = "default_owner_secret")]
    pub owner_secret: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_chat_limit")]
    pub chat_limit: usize,
    /// Song-change / Auto-DJ poll cadence.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Initial station settings; the owner can change them at runtime.
    #[serde(default)]
    pub settings: RadioSettings,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            owner_secret: default_owner_secret(),
            history_limit: default_history_limit(),
            chat_limit: default_chat_limit(),
            poll_interval_ms: default_poll_interval_ms(),
            settings: RadioSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_audio_dir")]
    pub audio_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            audio_dir: default_audio_dir(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, RadioError> {
        let config_path = if std::path::Path::new("config.toml").exists() {
            "config.toml"
        } else if std::path::Path::new("config.default.toml").exists() {
            "config.default.toml"
        } else {
            info!("No config file found, using built-in defaults");
            return Ok(Self::default().with_env_overrides());
        };

        info!("Loading configuration from: {}", config_path);
        let config_str = std::fs::read_to_string(config_path)?;
        let config: Config = toml::from_str(&config_str)
            .map_err(|e| RadioError::Config(format!("{config_path}: {e}")))?;
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(secret) = std::env::var("ACERADIO_OWNER_SECRET") {
            self.radio.owner_secret = secret;
        }
        if let Ok(dir) = std::env::var("ACERADIO_AUDIO_DIR") {
            self.storage.audio_dir = dir;
        }
        self
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_owner_secret() -> String {
    "default-radio-secret".to_string()
}

fn default_history_limit() -> usize {
    50
}

fn default_chat_limit() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_audio_dir() -> String {
    "public/audio".to_string()
}
