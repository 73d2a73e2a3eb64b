//! Centralized error types
//!
//! Two layers of errors:
//! - `AtError`: outcome of a single command on a live channel (cheap, `Copy`)
//! - `ChannelError`: setup and lifecycle failures (device, config, threads)
//!
//! Use `Result<T>` as shorthand for `std::result::Result<T, ChannelError>`.

use std::fmt;
use std::path::PathBuf;

use crate::transport::DeviceKind;

// =============================================================================
// Command errors
// =============================================================================

/// Failure of a command issued on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtError {
    /// Write failure or other unexpected condition
    Generic,
    /// Another command is already waiting for its final response
    CommandPending,
    /// The link was closed before or during the command
    ChannelClosed,
    /// No final response within the command timeout
    Timeout,
    /// Command issued from the channel's own reader thread
    InvalidThread,
    /// Final success without the intermediate line the command requires
    InvalidResponse,
}

impl AtError {
    /// Numeric code used by callers that report errors as integers
    pub fn code(self) -> i32 {
        match self {
            Self::Generic => -1,
            Self::CommandPending => -2,
            Self::ChannelClosed => -3,
            Self::Timeout => -4,
            Self::InvalidThread => -5,
            Self::InvalidResponse => -6,
        }
    }
}

impl std::error::Error for AtError {}

impl fmt::Display for AtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => write!(f, "AT command failed"),
            Self::CommandPending => write!(f, "Another AT command is pending"),
            Self::ChannelClosed => write!(f, "AT channel closed"),
            Self::Timeout => write!(f, "AT command timed out"),
            Self::InvalidThread => write!(f, "AT command issued from the reader thread"),
            Self::InvalidResponse => write!(f, "Invalid response to AT command"),
        }
    }
}

// =============================================================================
// Setup errors
// =============================================================================

/// Channel setup and lifecycle errors
#[derive(Debug)]
pub enum ChannelError {
    // === Device ===
    /// Failed to open the modem device
    DeviceOpen {
        device: String,
        source: std::io::Error,
    },
    /// Device kind not available on this platform, or malformed name
    UnsupportedDevice { device: String, kind: DeviceKind },

    // === Channel ===
    /// Reader thread did not register in time
    NotReady { channel: String },
    /// The calling thread already owns a channel with a live link
    AlreadyOpen { channel: String },
    /// Failed to spawn a channel thread
    Spawn {
        what: &'static str,
        source: std::io::Error,
    },
    /// Command failed on an otherwise healthy channel
    Command { command: String, source: AtError },

    // === IO ===
    /// File system operation failed
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to read config file
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Config file is not valid TOML for this schema
    ConfigParse { path: PathBuf, reason: String },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DeviceOpen { source, .. }
            | Self::Spawn { source, .. }
            | Self::Io { source, .. }
            | Self::ConfigRead { source, .. } => Some(source),
            Self::Command { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceOpen { device, .. } => write!(f, "Cannot open device: {}", device),
            Self::UnsupportedDevice { device, kind } => {
                write!(f, "Unsupported {:?} device: {}", kind, device)
            }
            Self::AlreadyOpen { channel } => {
                write!(f, "Channel {} is still open on this thread", channel)
            }
            Self::NotReady { channel } => {
                write!(f, "Reader for channel {} did not start", channel)
            }
            Self::Spawn { what, source } => write!(f, "Cannot spawn {}: {}", what, source),
            Self::Command { command, source } => write!(f, "{}: {}", command, source),
            Self::Io { path, .. } => write!(f, "IO error: {}", path.display()),
            Self::ConfigRead { path, .. } => {
                write!(f, "Cannot read config: {}", path.display())
            }
            Self::ConfigParse { path, reason } => {
                write!(f, "Invalid config {}: {}", path.display(), reason)
            }
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
        }
    }
}

/// Alias for Result with ChannelError
pub type Result<T> = std::result::Result<T, ChannelError>;
