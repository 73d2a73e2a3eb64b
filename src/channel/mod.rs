//! AT-command channel engine
//!
//! A channel turns a byte `Link` into a request/response protocol:
//! - a reader thread frames lines (`LineReader`) and classifies them
//!   (`classify`) against the single pending command
//! - command issuers block in `ChannelHandle::send` until the final line,
//!   a timeout, or link closure
//! - lines that belong to no command go to the unsolicited handler
//!   (default channel only)
//!
//! ```ignore
//! let registry = Arc::new(Registry::new());
//! let channel = channel::open(link, Some(handler), ChannelOptions::new("ttyACM0"), &registry)?;
//! let ready = channel.wait_ready(Duration::from_secs(5))?;
//! let csq = ready.send_singleline("AT+CSQ", "+CSQ:")?;
//! channel.close();
//! ```

pub mod classify;
pub mod codes;
pub mod command;
pub mod handle;
pub mod line_reader;
mod reader;
pub mod registry;
mod state;
pub mod stats;

pub use classify::{classify, is_final_error, is_final_success, Disposition, Pending, ResponseRules};
pub use codes::{cme_error, cms_error, CmeError, CmsError};
pub use command::{Command, CommandKind, Response};
pub use handle::ChannelHandle;
pub use line_reader::LineReader;
pub use registry::Registry;
pub use state::{ChannelCallback, UnsolicitedFn};
pub use stats::StatsSnapshot;

use crate::constants::DEFAULT_COMMAND_TIMEOUT_MS;
use crate::error::{ChannelError, Result};
use crate::logging::TrafficLog;
use crate::transport::Link;
use state::Settings;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, warn};

/// Parameters for opening a channel
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Name used in logs (usually the device)
    pub name: String,
    /// Deliver unsolicited lines from this channel
    pub is_default: bool,
    /// Default command timeout (zero = wait forever)
    pub command_timeout: Duration,
    pub rules: Arc<ResponseRules>,
    pub traffic: Option<TrafficLog>,
}

impl ChannelOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_default: true,
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            rules: Arc::new(ResponseRules::default()),
            traffic: None,
        }
    }

    pub fn default_channel(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn rules(mut self, rules: Arc<ResponseRules>) -> Self {
        self.rules = rules;
        self
    }

    pub fn traffic(mut self, log: Option<TrafficLog>) -> Self {
        self.traffic = log;
        self
    }
}

/// A channel with a running reader thread
///
/// Dropping it closes the link and joins the reader.
pub struct OpenChannel {
    handle: ChannelHandle,
    reader: Option<JoinHandle<()>>,
    registry: Arc<Registry>,
}

/// Open a channel on `link`
///
/// Registers the channel for the calling thread and spawns the reader
/// thread, which registers itself. Fails with `AlreadyOpen` if the calling
/// thread still owns a channel with a live link.
pub fn open(
    link: Link,
    unsolicited: Option<UnsolicitedFn>,
    options: ChannelOptions,
    registry: &Arc<Registry>,
) -> Result<OpenChannel> {
    let Link {
        reader: stream,
        writer,
        closer,
    } = link;

    let handle = registry.create();
    if !handle.is_closed() {
        warn!(
            "AT({}) cannot open {}: thread already owns a live channel",
            handle.name(),
            options.name
        );
        return Err(ChannelError::AlreadyOpen {
            channel: handle.name(),
        });
    }
    let settings = Settings {
        name: options.name.clone(),
        command_timeout: options.command_timeout,
        is_default: options.is_default,
        rules: options.rules,
        unsolicited,
        on_timeout: None,
        on_reader_closed: None,
        traffic: options.traffic,
    };
    handle.state().attach(writer, closer, settings);

    let state = handle.state().clone();
    let reader_registry = registry.clone();
    let spawned = thread::Builder::new()
        .name(format!("atc-reader-{}", options.name))
        .spawn(move || reader::run(state, stream, reader_registry));

    match spawned {
        Ok(join) => {
            debug!("AT({}) channel opened", options.name);
            Ok(OpenChannel {
                handle,
                reader: Some(join),
                registry: registry.clone(),
            })
        }
        Err(source) => {
            handle.state().close_link();
            registry.destroy(&handle);
            Err(ChannelError::Spawn {
                what: "reader thread",
                source,
            })
        }
    }
}

impl OpenChannel {
    pub fn handle(&self) -> &ChannelHandle {
        &self.handle
    }

    pub fn reader_thread(&self) -> Option<ThreadId> {
        self.reader.as_ref().map(|j| j.thread().id())
    }

    /// Block until the reader thread has registered the channel
    pub fn wait_ready(&self, timeout: Duration) -> Result<ChannelHandle> {
        let not_ready = || ChannelError::NotReady {
            channel: self.handle.name(),
        };
        let thread = self.reader_thread().ok_or_else(not_ready)?;
        self.registry
            .wait_registered(thread, timeout)
            .filter(|c| c.same_channel(&self.handle))
            .ok_or_else(not_ready)
    }

    /// Close the link, join the reader and drop all registrations
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        self.handle.state().close_link();
        if reader.join().is_err() {
            warn!("AT({}) reader thread panicked", self.handle.name());
        }
        self.registry.destroy(&self.handle);
        debug!("AT({}) channel closed", self.handle.name());
    }
}

impl Drop for OpenChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}
