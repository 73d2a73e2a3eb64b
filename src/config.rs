//! Configuration management
//!
//! Config is a TOML file passed on the command line (`--config`).
//! Every section is optional; missing keys take their defaults.

use crate::channel::ResponseRules;
use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_OPEN_RETRIES, HANDSHAKE_COMMAND,
    HANDSHAKE_RETRY_COUNT, HANDSHAKE_SETTLE_MS, HANDSHAKE_TIMEOUT_MS, OPEN_RETRY_DELAY_MS,
    TRAFFIC_LOG_CAPACITY, TRAFFIC_LOG_FLUSH_MS, TRAFFIC_LOG_MAX_BYTES, TRAFFIC_LOG_MAX_FILES,
};
use crate::error::{ChannelError, Result};
use crate::transport::DeviceKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

// =============================================================================
// Application Configuration
// =============================================================================

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub channels: Vec<ChannelConfig>,
    pub device: DeviceConfig,
    pub responses: ResponseRules,
    pub handshake: HandshakeConfig,
    pub traffic_log: TrafficLogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channels: vec![ChannelConfig::default()],
            device: DeviceConfig::default(),
            responses: ResponseRules::default(),
            handshake: HandshakeConfig::default(),
            traffic_log: TrafficLogConfig::default(),
        }
    }
}

impl Config {
    /// The channel that delivers unsolicited events, if any
    pub fn default_channel(&self) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.default_channel)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(ChannelError::ConfigValidation {
                field: "channels",
                reason: "at least one channel is required".into(),
            });
        }

        let defaults = self.channels.iter().filter(|c| c.default_channel).count();
        if defaults != 1 {
            return Err(ChannelError::ConfigValidation {
                field: "channels.default_channel",
                reason: format!("exactly one default channel required, found {}", defaults),
            });
        }

        for channel in &self.channels {
            if channel.device.trim().is_empty() {
                return Err(ChannelError::ConfigValidation {
                    field: "channels.device",
                    reason: "device name is empty".into(),
                });
            }
            if channel.kind == DeviceKind::Loopback && channel.device.parse::<u16>().is_err() {
                return Err(ChannelError::ConfigValidation {
                    field: "channels.device",
                    reason: format!("loopback device '{}' is not a port", channel.device),
                });
            }
        }

        if self.handshake.retries == 0 {
            return Err(ChannelError::ConfigValidation {
                field: "handshake.retries",
                reason: "must be at least 1".into(),
            });
        }

        Ok(())
    }
}

// =============================================================================
// Channel Configuration
// =============================================================================

/// One modem channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Device node, socket path, or loopback port
    pub device: String,
    /// How `device` is opened
    pub kind: DeviceKind,
    /// Whether unsolicited events on this channel reach the handler
    pub default_channel: bool,
    /// Command timeout (milliseconds, 0 = wait forever)
    pub command_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyACM0".to_string(),
            kind: DeviceKind::Tty,
            default_channel: true,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
        }
    }
}

impl ChannelConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

// =============================================================================
// Device Configuration
// =============================================================================

/// Device open parameters shared by all channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial baud rate (ignored for sockets)
    pub baud_rate: u32,
    /// Open attempts before giving up
    pub open_retries: u32,
    /// Delay between open attempts (milliseconds)
    pub open_retry_delay_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            open_retries: DEFAULT_OPEN_RETRIES,
            open_retry_delay_ms: OPEN_RETRY_DELAY_MS,
        }
    }
}

// =============================================================================
// Handshake Configuration
// =============================================================================

/// Channel handshake parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Command sent until the modem answers
    pub command: String,
    /// Attempts before giving up
    pub retries: u32,
    /// Per-attempt timeout (milliseconds)
    pub timeout_ms: u64,
    /// Pause after success (milliseconds)
    pub settle_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            command: HANDSHAKE_COMMAND.to_string(),
            retries: HANDSHAKE_RETRY_COUNT,
            timeout_ms: HANDSHAKE_TIMEOUT_MS,
            settle_ms: HANDSHAKE_SETTLE_MS,
        }
    }
}

// =============================================================================
// Traffic Log Configuration
// =============================================================================

/// Rotating file log of every line sent and received
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficLogConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub max_bytes: u64,
    pub max_files: usize,
    pub flush_interval_ms: u64,
    pub channel_capacity: usize,
}

impl Default for TrafficLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("atc-traffic.log"),
            max_bytes: TRAFFIC_LOG_MAX_BYTES,
            max_files: TRAFFIC_LOG_MAX_FILES,
            flush_interval_ms: TRAFFIC_LOG_FLUSH_MS,
            channel_capacity: TRAFFIC_LOG_CAPACITY,
        }
    }
}

// =============================================================================
// Load / Save
// =============================================================================

/// Load config, falling back to defaults on any problem
pub fn load(path: Option<&Path>) -> Config {
    let Some(path) = path else {
        return Config::default();
    };

    match load_from(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{}, using defaults", e);
            Config::default()
        }
    }
}

/// Load config from `path`, reporting read and parse errors
pub fn load_from(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| ChannelError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| ChannelError::ConfigParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Save config to `path`
pub fn save(config: &Config, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config).map_err(|e| ChannelError::ConfigValidation {
        field: "config",
        reason: e.to_string(),
    })?;
    fs::write(path, content).map_err(|e| ChannelError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

// ============================================================================
// Tests
// ============================================================================
