//! Stream socket transports (loopback TCP and local Unix sockets)
//!
//! Shutting down a cloned handle of the socket wakes the reader with
//! end-of-stream, which is how channel close unblocks the reader thread.

use super::{Closer, DeviceKind, Link};
use crate::error::{ChannelError, Result};
use std::io;
use std::net::{Ipv4Addr, Shutdown, TcpStream};

/// Connect to `127.0.0.1:<name>`
pub fn open_loopback(name: &str) -> Result<Link> {
    let port: u16 = name
        .trim()
        .parse()
        .map_err(|_| ChannelError::UnsupportedDevice {
            device: name.to_string(),
            kind: DeviceKind::Loopback,
        })?;

    let map_err = |source: io::Error| ChannelError::DeviceOpen {
        device: name.to_string(),
        source,
    };
    let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).map_err(map_err)?;
    tcp_link(stream).map_err(map_err)
}

/// Build a link from a connected TCP stream
pub fn tcp_link(stream: TcpStream) -> io::Result<Link> {
    // Command lines are tiny; Nagle would only add latency.
    let _ = stream.set_nodelay(true);
    let reader = stream.try_clone()?;
    let closer = stream.try_clone()?;
    Ok(Link::new(Box::new(reader), Box::new(stream), Box::new(closer)))
}

impl Closer for TcpStream {
    fn close(&self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

/// Connect to a local stream socket at path `name`
#[cfg(unix)]
pub fn open_local(name: &str) -> Result<Link> {
    use std::os::unix::net::UnixStream;

    let map_err = |source: io::Error| ChannelError::DeviceOpen {
        device: name.to_string(),
        source,
    };
    let stream = UnixStream::connect(name).map_err(map_err)?;
    unix_link(stream).map_err(map_err)
}

/// Local sockets are not available on this platform
#[cfg(not(unix))]
pub fn open_local(name: &str) -> Result<Link> {
    Err(ChannelError::UnsupportedDevice {
        device: name.to_string(),
        kind: DeviceKind::Socket,
    })
}

/// Build a link from a connected Unix stream
#[cfg(unix)]
pub fn unix_link(stream: std::os::unix::net::UnixStream) -> io::Result<Link> {
    let reader = stream.try_clone()?;
    let closer = stream.try_clone()?;
    Ok(Link::new(Box::new(reader), Box::new(stream), Box::new(closer)))
}

#[cfg(unix)]
impl Closer for std::os::unix::net::UnixStream {
    fn close(&self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}
