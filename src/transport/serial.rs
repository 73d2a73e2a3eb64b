//! Serial (tty) transport
//!
//! The port is opened with a short read timeout so the reader can poll a
//! close flag: a blocked serial read cannot be interrupted from another
//! thread on every platform. Timeouts are swallowed here; the channel only
//! ever sees data, end-of-stream (after close) or a real error.

use super::{Closer, Link};
use crate::constants::SERIAL_POLL_TIMEOUT_MS;
use crate::error::{ChannelError, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Open a serial device in raw 8N1 mode
pub fn open(name: &str, baud_rate: u32) -> Result<Link> {
    let map_err = |e: serialport::Error| ChannelError::DeviceOpen {
        device: name.to_string(),
        source: io::Error::other(e.to_string()),
    };

    let port = serialport::new(name, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(Duration::from_millis(SERIAL_POLL_TIMEOUT_MS))
        .open()
        .map_err(map_err)?;
    let write_port = port.try_clone().map_err(map_err)?;

    let closed = Arc::new(AtomicBool::new(false));
    Ok(Link::new(
        Box::new(SerialReader {
            port,
            closed: closed.clone(),
        }),
        Box::new(SerialWriter { port: write_port }),
        Box::new(CloseFlag(closed)),
    ))
}

/// Read half of a serial link
struct SerialReader {
    port: Box<dyn SerialPort>,
    closed: Arc<AtomicBool>,
}

impl Read for SerialReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Ok(0);
            }
            match self.port.read(buf) {
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => continue,
                other => return other,
            }
        }
    }
}

/// Write half of a serial link
struct SerialWriter {
    port: Box<dyn SerialPort>,
}

impl Write for SerialWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

/// Makes the serial reader report end-of-stream on its next poll
struct CloseFlag(Arc<AtomicBool>);

impl Closer for CloseFlag {
    fn close(&self) {
        self.0.store(true, Ordering::Release);
    }
}
