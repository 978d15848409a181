use hublink_protocol::{Codec, DEFAULT_WELCOME_KEY};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding the configured endpoint.
pub const ENDPOINT_ENV: &str = "HUBLINK_ENDPOINT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Hub socket URL, e.g. `wss://hub.example.com/ws`.
    pub endpoint: String,
    /// Key of the inbound frame marking application-level readiness.
    pub welcome_key: String,
    /// Delay before an explicit reconnect builds a new transport.
    pub reconnect_delay_ms: u64,
    /// Per-request timeout. `None` waits for the hub indefinitely.
    pub request_timeout_ms: Option<u64>,
    /// Rewrite ISO-8601 strings in inbound payloads into tagged dates.
    /// Set to `false` to receive them as plain strings.
    pub revive_dates: bool,
    /// Inbound frames longer than this are dropped unread.
    pub max_frame_bytes: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080/ws".to_string(),
            welcome_key: DEFAULT_WELCOME_KEY.to_string(),
            reconnect_delay_ms: 3_000,
            request_timeout_ms: None,
            revive_dates: true,
            max_frame_bytes: None,
        }
    }
}

impl ClientConfig {
    /// Load the default config file if it exists, then apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            Self::default()
        };
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            config.endpoint = endpoint;
        }
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn config_path() -> PathBuf {
        dirs_path().join("config.toml")
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn codec(&self) -> Codec {
        Codec::new()
            .with_welcome_key(self.welcome_key.clone())
            .with_date_revival(self.revive_dates)
    }
}

/// Returns the config directory for hublink.
pub fn dirs_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("hublink")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("hublink")
    } else {
        PathBuf::from("/tmp/hublink")
    }
}
