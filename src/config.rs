//! Configuration for the socket sensor
//!
//! Two ways in: a TOML file ([`SensorConfig::load_from_file`]) for the CLI,
//! and a loose key/value map ([`validate_attributes`]) for hosts that hand
//! over attributes they collected themselves.

use crate::protocol::{TextEncoding, DEFAULT_MAX_LINE_BYTES};
use crate::transport::socket::{
    health_monitor::{DEFAULT_BACKOFF_MS, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT},
    Endpoint, HealthMonitor, ReconnectPolicy, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Keys every attribute map must carry, by canonical name
pub const REQUIRED_ATTRIBUTES: [&str; 3] = ["endpoint_path", "buffer_size", "encoding"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorConfig {
    #[serde(default)]
    pub sensor: SensorSection,
    pub socket: SocketSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub reporting: ReportingSection,
}

/// Sensor identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorSection {
    /// Name used in logs
    #[serde(default = "default_sensor_name")]
    pub name: String,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            name: default_sensor_name(),
        }
    }
}

fn default_sensor_name() -> String {
    "socket-sensor".to_string()
}

/// Socket section - where and how to read the stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocketSection {
    /// Filesystem path of the Unix socket
    #[serde(alias = "socket_file")]
    pub endpoint_path: PathBuf,
    /// Bytes requested per receive (default: 1024)
    #[serde(alias = "bufsize", default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Stream text encoding (default: "utf-8")
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Longest accepted line in bytes (default: 1 MiB)
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl SocketSection {
    pub fn new(endpoint_path: impl Into<PathBuf>) -> Self {
        Self {
            endpoint_path: endpoint_path.into(),
            buffer_size: default_buffer_size(),
            encoding: default_encoding(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_encoding() -> String {
    TextEncoding::Utf8.name().to_string()
}

fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

/// Reconnect section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// Escalating delays for the first retries (default: none)
    #[serde(default)]
    pub backoff_pattern_ms: Vec<u64>,
    /// Delay once the pattern is exhausted (default: 100)
    #[serde(default = "default_sustained_delay_ms")]
    pub sustained_delay_ms: u64,
    /// Connect deadline, 0 disables (default: 5000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Receive deadline, 0 disables (default: 30000)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            backoff_pattern_ms: Vec::new(),
            sustained_delay_ms: default_sustained_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

fn default_sustained_delay_ms() -> u64 {
    DEFAULT_BACKOFF_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT.as_millis() as u64
}

fn optional_timeout(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl ReconnectSection {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            backoff_pattern: self.backoff_pattern_ms.clone(),
            sustained_delay_ms: self.sustained_delay_ms,
            connect_timeout: optional_timeout(self.connect_timeout_ms),
            read_timeout: optional_timeout(self.read_timeout_ms),
        }
    }
}

/// Reporting section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReportingSection {
    /// Hand out the retained record while disconnected (default: false)
    #[serde(default)]
    pub serve_stale: bool,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("Missing required attributes: {}", .0.join(", "))]
    MissingAttributes(Vec<String>),
    #[error("Unsupported encoding '{0}' (expected utf-8, ascii or latin-1)")]
    UnsupportedEncoding(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SensorConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SensorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every field that serde alone cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket.endpoint_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "socket.endpoint_path must not be empty".to_string(),
            ));
        }
        if self.socket.buffer_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "socket.buffer_size must be a positive integer".to_string(),
            ));
        }
        if self.socket.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::InvalidConfig(format!(
                "socket.buffer_size must be at most {MAX_BUFFER_SIZE}, got {}",
                self.socket.buffer_size
            )));
        }
        if self.socket.max_line_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "socket.max_line_bytes must be a positive integer".to_string(),
            ));
        }
        parse_encoding(&self.socket.encoding)?;
        HealthMonitor::validate_policy(&self.policy())
            .map_err(|e| ConfigError::InvalidConfig(format!("reconnect: {e}")))?;
        Ok(())
    }

    /// Endpoint descriptor for the socket section
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let encoding = parse_encoding(&self.socket.encoding)?;
        Ok(Endpoint::new(&self.socket.endpoint_path)
            .with_buffer_size(self.socket.buffer_size)
            .with_encoding(encoding)
            .with_max_line_bytes(self.socket.max_line_bytes))
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.reconnect.policy()
    }
}

impl From<SocketSection> for SensorConfig {
    fn from(socket: SocketSection) -> Self {
        Self {
            sensor: SensorSection::default(),
            socket,
            reconnect: ReconnectSection::default(),
            reporting: ReportingSection::default(),
        }
    }
}

fn parse_encoding(label: &str) -> Result<TextEncoding, ConfigError> {
    TextEncoding::parse(label).ok_or_else(|| ConfigError::UnsupportedEncoding(label.to_string()))
}

/// Look up a key under its canonical name or its legacy alias
fn lookup<'a>(attributes: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let legacy = match key {
        "endpoint_path" => Some("socket_file"),
        "buffer_size" => Some("bufsize"),
        _ => None,
    };
    attributes
        .get(key)
        .or_else(|| legacy.and_then(|alias| attributes.get(alias)))
}

fn positive_integer(key: &str, value: &Value) -> Result<usize, ConfigError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n > 0 => usize::try_from(n)
            .map_err(|_| ConfigError::InvalidConfig(format!("{key} is too large: {n}"))),
        _ => Err(ConfigError::InvalidConfig(format!(
            "{key} must be a positive integer, got {value}"
        ))),
    }
}

/// Validate a host-supplied attribute map and build the socket section
///
/// All missing keys are reported together.
pub fn validate_attributes(attributes: &Map<String, Value>) -> Result<SocketSection, ConfigError> {
    let [Some(path), Some(size), Some(label)] = REQUIRED_ATTRIBUTES.map(|key| lookup(attributes, key))
    else {
        let missing = REQUIRED_ATTRIBUTES
            .iter()
            .filter(|key| lookup(attributes, key).is_none())
            .map(|key| key.to_string())
            .collect();
        return Err(ConfigError::MissingAttributes(missing));
    };

    let endpoint_path = match path {
        Value::String(path) if !path.trim().is_empty() => PathBuf::from(path),
        other => {
            return Err(ConfigError::InvalidConfig(format!(
                "endpoint_path must be a non-empty string, got {other}"
            )))
        }
    };

    let buffer_size = positive_integer("buffer_size", size)?;
    if buffer_size > MAX_BUFFER_SIZE {
        return Err(ConfigError::InvalidConfig(format!(
            "buffer_size must be at most {MAX_BUFFER_SIZE}, got {buffer_size}"
        )));
    }

    let encoding = match label {
        Value::String(label) => parse_encoding(label)?.name().to_string(),
        other => return Err(ConfigError::UnsupportedEncoding(other.to_string())),
    };

    let max_line_bytes = match attributes.get("max_line_bytes") {
        Some(value) => positive_integer("max_line_bytes", value)?,
        None => DEFAULT_MAX_LINE_BYTES,
    };

    Ok(SocketSection {
        endpoint_path,
        buffer_size,
        encoding,
        max_line_bytes,
    })
}
