//! Channel worker
//!
//! One thread per channel that owns its lifecycle:
//!
//! `Opening -> Initializing -> Running -> Closing -> Closed`
//!
//! - **Opening**: device open through the injected `Device`
//! - **Initializing**: channel open, reader registered, callbacks wired,
//!   `ChannelHandler::init` run
//! - **Running**: items popped from the `RequestQueue` and handed to the
//!   handler until terminate or an empty pop
//! - **Closing/Closed**: link closed, reader joined, registrations dropped,
//!   device released
//!
//! A failed open goes straight to `Closed` without ever running.

pub mod queue;

pub use queue::{ItemKind, QueueItem, RequestQueue, WorkQueue};

use crate::channel::{self, ChannelHandle, ChannelOptions, Registry, ResponseRules, UnsolicitedFn};
use crate::config::ChannelConfig;
use crate::constants::READER_READY_TIMEOUT_MS;
use crate::error::{ChannelError, Result};
use crate::logging::TrafficLog;
use crate::transport::Device;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Business logic plugged into a channel worker
///
/// Everything except `handle_request` defaults to a no-op.
pub trait ChannelHandler: Send + Sync + 'static {
    /// Channel-specific setup, run on the worker thread before `Running`
    fn init(&self, _channel: &ChannelHandle) {}

    /// Unsolicited line, called on the reader thread. Must not send.
    fn on_unsolicited(&self, _line: &str, _second: Option<&str>) {}

    /// Queued request, called on the worker thread
    fn handle_request(&self, channel: &ChannelHandle, item: QueueItem);

    /// Queued unsolicited work, called on the worker thread
    fn handle_unsolicited(&self, _channel: &ChannelHandle, _item: QueueItem) {}

    /// A command timed out; the channel is now in error recovery
    fn on_timeout(&self) {}

    /// The link closed without being asked to
    fn on_reader_closed(&self) {}
}

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Opening,
    Initializing,
    Running,
    Closing,
    Closed,
}

/// State shared between a worker thread and its handles
struct Shared {
    state: Mutex<WorkerState>,
    changed: Condvar,
    terminate: AtomicBool,
    channel: Mutex<Option<ChannelHandle>>,
    queue: Arc<dyn RequestQueue>,
}

impl Shared {
    fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
        self.changed.notify_all();
    }
}

/// Everything a worker needs, assembled before spawning
pub struct ChannelWorker {
    pub channel: ChannelConfig,
    pub rules: Arc<ResponseRules>,
    pub traffic: Option<TrafficLog>,
    pub device: Arc<dyn Device>,
    pub handler: Arc<dyn ChannelHandler>,
    pub queue: Arc<dyn RequestQueue>,
    pub registry: Arc<Registry>,
}

impl ChannelWorker {
    /// Start the worker thread
    pub fn spawn(self) -> Result<WorkerHandle> {
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState::Opening),
            changed: Condvar::new(),
            terminate: AtomicBool::new(false),
            channel: Mutex::new(None),
            queue: self.queue.clone(),
        });

        let name = self.channel.device.clone();
        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name(format!("atc-worker-{}", name))
            .spawn(move || self.run(&thread_shared))
            .map_err(|source| ChannelError::Spawn {
                what: "channel worker",
                source,
            })?;

        Ok(WorkerHandle {
            name,
            shared,
            thread: Some(thread),
        })
    }

    fn run(self, shared: &Shared) {
        let name = self.channel.device.clone();
        let kind = self.channel.kind;
        let is_default = self.channel.default_channel;

        // === Opening ===
        let link = match self.device.open(&name, kind, is_default) {
            Ok(link) => link,
            Err(e) => {
                error!("Channel {}: {}", name, e);
                shared.set_state(WorkerState::Closed);
                return;
            }
        };

        // === Initializing ===
        shared.set_state(WorkerState::Initializing);
        let handler = self.handler.clone();
        let unsolicited: UnsolicitedFn =
            Arc::new(move |line: &str, second: Option<&str>| handler.on_unsolicited(line, second));
        let options = ChannelOptions::new(name.as_str())
            .default_channel(is_default)
            .command_timeout(self.channel.command_timeout())
            .rules(self.rules.clone())
            .traffic(self.traffic.clone());

        let opened = match channel::open(link, Some(unsolicited), options, &self.registry) {
            Ok(opened) => opened,
            Err(e) => {
                error!("Channel {}: {}", name, e);
                self.device.close(&name);
                shared.set_state(WorkerState::Closed);
                return;
            }
        };
        let channel = match opened.wait_ready(Duration::from_millis(READER_READY_TIMEOUT_MS)) {
            Ok(channel) => channel,
            Err(e) => {
                error!("Channel {}: {}", name, e);
                opened.close();
                self.device.close(&name);
                shared.set_state(WorkerState::Closed);
                return;
            }
        };

        let handler = self.handler.clone();
        channel.set_on_timeout(move || handler.on_timeout());
        let handler = self.handler.clone();
        channel.set_on_reader_closed(move || handler.on_reader_closed());
        *shared.channel.lock() = Some(channel.clone());

        self.handler.init(&channel);

        // === Running ===
        shared.set_state(WorkerState::Running);
        info!("Channel {} running", name);
        while !shared.terminate.load(Ordering::Acquire) {
            let Some(item) = self.queue.pop() else {
                break;
            };
            match item.kind {
                ItemKind::Request | ItemKind::RequestLowPriority => {
                    self.handler.handle_request(&channel, item)
                }
                ItemKind::Unsolicited => self.handler.handle_unsolicited(&channel, item),
            }
        }

        // === Closing ===
        shared.set_state(WorkerState::Closing);
        *shared.channel.lock() = None;
        opened.close();
        self.device.close(&name);
        shared.set_state(WorkerState::Closed);
        info!("Channel {} closed", name);
    }
}

/// Asks a worker to stop; cloneable into handler callbacks
#[derive(Clone)]
pub struct Terminator {
    shared: Arc<Shared>,
}

impl Terminator {
    /// Close the link (failing any command in flight), then unblock the queue
    pub fn terminate(&self) {
        self.shared.terminate.store(true, Ordering::Release);
        let channel = self.shared.channel.lock().clone();
        if let Some(channel) = channel {
            channel.close();
        }
        self.shared.queue.unblock();
    }
}

/// Handle to a running channel worker
pub struct WorkerHandle {
    name: String,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state.lock()
    }

    /// Running with a usable channel
    pub fn is_ready(&self) -> bool {
        self.state() == WorkerState::Running
            && self.channel().is_some_and(|c| c.is_ready())
    }

    /// The live channel, while the worker is initialized
    pub fn channel(&self) -> Option<ChannelHandle> {
        self.shared.channel.lock().clone()
    }

    /// Wait until the worker reaches `target` (or `Closed`)
    pub fn wait_for(&self, target: WorkerState, timeout: Duration) -> WorkerState {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while *state != target && *state != WorkerState::Closed {
            if self
                .shared
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        *state
    }

    pub fn terminator(&self) -> Terminator {
        Terminator {
            shared: self.shared.clone(),
        }
    }

    pub fn terminate(&self) {
        self.terminator().terminate();
    }

    /// Wait for the worker thread to finish
    pub fn join(mut self) {
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Channel {} worker panicked", self.name);
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.terminate();
            self.join_thread();
        }
    }
}
