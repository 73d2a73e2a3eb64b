//! Shared fixtures: a scripted modem on the far end of a loopback TCP link

#![allow(dead_code)]

use at_channel::channel::{self, ChannelHandle, ChannelOptions, OpenChannel, Registry, UnsolicitedFn};
use at_channel::transport::{socket, Link};
use parking_lot::{Condvar, Mutex};
use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

/// Modem side of a link
pub struct Modem {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Modem {
    /// Next command line the host wrote, without its `\r`
    pub fn expect_command(&mut self) -> String {
        self.read_until(b'\r')
    }

    /// Bytes up to (excluding) the Ctrl-Z that ends a data payload
    pub fn expect_payload(&mut self) -> String {
        self.read_until(0x1A)
    }

    fn read_until(&mut self, delimiter: u8) -> String {
        let mut buf = Vec::new();
        self.reader.read_until(delimiter, &mut buf).unwrap();
        assert_eq!(buf.last(), Some(&delimiter), "link closed mid-read");
        buf.pop();
        String::from_utf8(buf).unwrap()
    }

    /// Write each line with the usual `\r\n` framing
    pub fn reply(&mut self, lines: &[&str]) {
        let mut out = String::new();
        for line in lines {
            out.push_str("\r\n");
            out.push_str(line);
            out.push_str("\r\n");
        }
        self.raw(out.as_bytes());
    }

    pub fn raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).unwrap();
        self.writer.flush().unwrap();
    }

    /// Drop the modem side of the connection
    pub fn hang_up(self) {
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
    }
}

/// A connected host link and its modem peer
pub fn connect() -> (Link, Modem) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let host = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (peer, _) = listener.accept().unwrap();
    peer.set_read_timeout(Some(WAIT)).unwrap();

    let modem = Modem {
        reader: BufReader::new(peer.try_clone().unwrap()),
        writer: peer,
    };
    (socket::tcp_link(host).unwrap(), modem)
}

/// Unsolicited events seen by a handler
#[derive(Default)]
pub struct Events {
    seen: Mutex<Vec<(String, Option<String>)>>,
    cond: Condvar,
}

impl Events {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn handler(self: &Arc<Self>) -> UnsolicitedFn {
        let events = self.clone();
        Arc::new(move |line: &str, second: Option<&str>| {
            events
                .seen
                .lock()
                .push((line.to_string(), second.map(str::to_string)));
            events.cond.notify_all();
        })
    }

    /// Wait until at least `count` events arrived, then return all of them
    pub fn wait_for(&self, count: usize) -> Vec<(String, Option<String>)> {
        let deadline = Instant::now() + WAIT;
        let mut seen = self.seen.lock();
        while seen.len() < count {
            if self.cond.wait_until(&mut seen, deadline).timed_out() {
                break;
            }
        }
        seen.clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.seen.lock().iter().map(|(l, _)| l.clone()).collect()
    }
}

/// An open, ready channel plus everything a test pokes at
pub struct Fixture {
    pub opened: OpenChannel,
    pub channel: ChannelHandle,
    pub modem: Modem,
    pub registry: Arc<Registry>,
}

pub fn open_with(options: ChannelOptions, unsolicited: Option<UnsolicitedFn>) -> Fixture {
    let (link, modem) = connect();
    let registry = Arc::new(Registry::new());
    let opened = channel::open(link, unsolicited, options, &registry).unwrap();
    let channel = opened.wait_ready(WAIT).unwrap();
    Fixture {
        opened,
        channel,
        modem,
        registry,
    }
}

pub fn open_default(events: &Arc<Events>) -> Fixture {
    open_with(ChannelOptions::new("test"), Some(events.handler()))
}

/// Poll `cond` until true or the shared deadline passes
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}
