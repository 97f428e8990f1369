//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Game server connection settings.
    pub network: NetworkConfig,
    /// HTTP fallback channel settings.
    pub http: HttpConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Which transport carries the framed protocol.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportKind {
    /// Plain TCP stream socket.
    #[default]
    Tcp,
    /// WebSocket (`ws://host:port/=<protocol_version>`).
    WebSocket,
}

/// Game server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server address as a single `host:port` string.
    pub address: String,
    /// Transport used for the connection.
    pub transport: TransportKind,
    /// Protocol version appended to the WebSocket path.
    pub protocol_version: String,
    /// Connect attempt timeout in seconds (DNS, TCP connect and handshake).
    pub connect_timeout_seconds: u32,
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: u32,
    /// Size of the socket read buffer in bytes.
    pub read_buffer_size: usize,
}

/// HTTP fallback configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Base URL the `cmd`/`jid` query is appended to. Empty disables the channel.
    pub base_url: String,
    /// Session id sent as the `jid` query parameter.
    pub session_id: String,
    /// Whole-request timeout in seconds.
    pub timeout_seconds: u32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7777".to_string(),
            transport: TransportKind::Tcp,
            protocol_version: "1".to_string(),
            connect_timeout_seconds: 10,
            max_frame_size: 1_048_576,
            read_buffer_size: 4096,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            session_id: String::new(),
            timeout_seconds: 60,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ron";

/// Platform config directory for the client (`<config dir>/warband`).
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warband")
}

impl Config {
    /// Read `config.ron` from `config_dir`, writing the defaults there first
    /// if the file does not exist yet.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Wrote default config to {}", path.display());
            return Ok(config);
        }

        let config = Self::read(&path)?;
        config.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write this config to `config_dir/config.ron`, creating the directory.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::Write {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .struct_names(false);
        let text = ron::ser::to_string_pretty(self, pretty)?;

        let path = config_dir.join(CONFIG_FILE_NAME);
        std::fs::write(&path, text).map_err(|source| ConfigError::Write { path, source })
    }

    /// Re-read the file; `Some` only if it now differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let fresh = Self::read(&config_dir.join(CONFIG_FILE_NAME))?;
        fresh.validate()?;
        if fresh == *self {
            return Ok(None);
        }
        log::info!("Config changed on disk");
        Ok(Some(fresh))
    }

    /// Reject values the network layer cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        match self.network.address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => return invalid("network.address", "expected host:port"),
        }
        if self.network.max_frame_size == 0 {
            return invalid("network.max_frame_size", "must be positive");
        }
        if self.network.read_buffer_size == 0 {
            return invalid("network.read_buffer_size", "must be positive");
        }
        if self.network.connect_timeout_seconds == 0 {
            return invalid("network.connect_timeout_seconds", "must be positive");
        }
        if self.http.timeout_seconds == 0 {
            return invalid("http.timeout_seconds", "must be positive");
        }
        Ok(())
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
