//! Device transports for modem links
//!
//! A transport turns a device name into a `Link`:
//! - **reader**: blocking byte source consumed by the channel reader thread
//! - **writer**: byte sink used by command issuers (under the channel lock)
//! - **closer**: unblocks the reader from another thread
//!
//! Three device kinds are supported:
//! - `tty`: serial device (USB CDC, UART)
//! - `socket`: local stream socket path (Unix only)
//! - `loopback`: TCP port on 127.0.0.1
//!
//! # Adding a new transport
//!
//! 1. Create `transport/my_transport.rs` returning a `Link`
//! 2. Add a `DeviceKind` variant and route it in `open_link`

pub mod serial;
pub mod socket;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::error::{ChannelError, Result};

/// Kind of device a channel runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Serial device node
    #[default]
    Tty,
    /// Local stream socket path
    Socket,
    /// TCP port on the loopback interface
    Loopback,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tty => "tty",
            Self::Socket => "socket",
            Self::Loopback => "loopback",
        };
        f.write_str(name)
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tty" => Ok(Self::Tty),
            "socket" => Ok(Self::Socket),
            "loopback" => Ok(Self::Loopback),
            other => Err(format!("unknown device kind '{}'", other)),
        }
    }
}

/// Unblocks a reader that is parked in a blocking read
pub trait Closer: Send + Sync {
    fn close(&self);
}

/// An open, bidirectional byte link to a modem
pub struct Link {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub closer: Box<dyn Closer>,
}

impl Link {
    pub fn new(
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
        closer: Box<dyn Closer>,
    ) -> Self {
        Self {
            reader,
            writer,
            closer,
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Device open/close capability injected into channel workers
///
/// One implementation covers the standard device kinds; tests and
/// embedders provide their own to hand out pre-built links.
pub trait Device: Send + Sync {
    /// Open `name` as a link of the given kind
    fn open(&self, name: &str, kind: DeviceKind, is_default: bool) -> Result<Link>;

    /// Called once the channel on `name` is fully torn down
    fn close(&self, name: &str) {
        debug!("Device {} closed", name);
    }
}

/// Open a link of the given kind without retrying
pub fn open_link(name: &str, kind: DeviceKind, baud_rate: u32) -> Result<Link> {
    match kind {
        DeviceKind::Tty => serial::open(name, baud_rate),
        DeviceKind::Socket => socket::open_local(name),
        DeviceKind::Loopback => socket::open_loopback(name),
    }
}

/// Standard device opener with retry
#[derive(Debug, Clone)]
pub struct StdDevice {
    baud_rate: u32,
    open_retries: u32,
    retry_delay: Duration,
}

impl StdDevice {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            baud_rate: config.baud_rate,
            open_retries: config.open_retries.max(1),
            retry_delay: Duration::from_millis(config.open_retry_delay_ms),
        }
    }
}

impl Device for StdDevice {
    fn open(&self, name: &str, kind: DeviceKind, is_default: bool) -> Result<Link> {
        let mut attempt = 1;
        loop {
            match open_link(name, kind, self.baud_rate) {
                Ok(link) => {
                    info!(
                        "Opened {} device {} (default channel: {})",
                        kind, name, is_default
                    );
                    return Ok(link);
                }
                Err(e @ ChannelError::UnsupportedDevice { .. }) => return Err(e),
                Err(e) if attempt >= self.open_retries => return Err(e),
                Err(e) => {
                    warn!(
                        "Open attempt {}/{} failed: {}, retrying",
                        attempt, self.open_retries, e
                    );
                    attempt += 1;
                    thread::sleep(self.retry_delay);
                }
            }
        }
    }
}
