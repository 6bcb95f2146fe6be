//! Configuration system for lowpass.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location (read only, never written):
//!   1. $LOWPASS_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/lowpass/config.toml
//!   3. ~/.config/lowpass/config.toml
//!
//! Library types take these structs as constructor arguments. Only the
//! binaries call `load()`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::{DEFAULT_FRAGMENT_BODY, DEFAULT_PACING_MS, DEFAULT_SERVER_PORT};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LowpassConfig {
    pub network: NetworkConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the server binds. The client always binds an ephemeral port.
    pub bind_addr: String,
    /// UDP port the server listens on. 0 = OS-assigned.
    pub port: u16,
    /// Maximum fragment body in bytes. Clamped to what fits in a datagram.
    pub fragment_size: usize,
    /// Delay between consecutive fragment sends.
    pub pacing_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Max images filtered at once. 0 = available parallelism.
    pub max_concurrent_jobs: u32,
    /// Column partitions per image. 0 or 1 = sequential.
    pub parallelism: u32,
    /// Partial transfers idle longer than this are evicted.
    pub reassembly_ttl_secs: u64,
    /// How long a completed transfer's fragments are recognised as strays.
    pub stray_window_ms: u64,
    /// Encoding of processed images sent back to clients.
    pub output_format: OutputFormat,
    /// Also run the sequential filter and log both timings.
    pub compare_sequential: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address as host:port.
    pub server_addr: String,
    /// Brightness factor sent with each image.
    pub brightness: f32,
    /// Give up when no reply datagram arrives for this long.
    pub reply_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
}

impl std::str::FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            other => Err(ConfigError::UnknownFormat(other.to_string())),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_SERVER_PORT,
            fragment_size: DEFAULT_FRAGMENT_BODY,
            pacing_ms: DEFAULT_PACING_MS,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 0,
            parallelism: 6,
            reassembly_ttl_secs: 30,
            stray_window_ms: 2000,
            output_format: OutputFormat::Png,
            compare_sequential: false,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{DEFAULT_SERVER_PORT}"),
            brightness: 1.0,
            reply_timeout_secs: 30,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("lowpass")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("unknown output format: {0}")]
    UnknownFormat(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl LowpassConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            LowpassConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file. Missing keys take their defaults.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("LOWPASS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply LOWPASS_* overrides. `lookup` is `std::env::var` outside tests.
    /// Values that fail to parse are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("LOWPASS_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(p) = lookup("LOWPASS_NETWORK__PORT").and_then(|v| v.parse().ok()) {
            self.network.port = p;
        }
        if let Some(n) = lookup("LOWPASS_NETWORK__FRAGMENT_SIZE").and_then(|v| v.parse().ok()) {
            self.network.fragment_size = n;
        }
        if let Some(n) = lookup("LOWPASS_NETWORK__PACING_MS").and_then(|v| v.parse().ok()) {
            self.network.pacing_ms = n;
        }
        if let Some(n) = lookup("LOWPASS_SERVER__MAX_CONCURRENT_JOBS").and_then(|v| v.parse().ok()) {
            self.server.max_concurrent_jobs = n;
        }
        if let Some(n) = lookup("LOWPASS_SERVER__PARALLELISM").and_then(|v| v.parse().ok()) {
            self.server.parallelism = n;
        }
        if let Some(f) = lookup("LOWPASS_SERVER__OUTPUT_FORMAT").and_then(|v| v.parse().ok()) {
            self.server.output_format = f;
        }
        if let Some(v) = lookup("LOWPASS_SERVER__COMPARE_SEQUENTIAL") {
            self.server.compare_sequential = v == "true" || v == "1";
        }
        if let Some(v) = lookup("LOWPASS_CLIENT__SERVER_ADDR") {
            self.client.server_addr = v;
        }
        if let Some(b) = lookup("LOWPASS_CLIENT__BRIGHTNESS").and_then(|v| v.parse().ok()) {
            self.client.brightness = b;
        }
        if let Some(n) = lookup("LOWPASS_CLIENT__REPLY_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.client.reply_timeout_secs = n;
        }
    }
}
