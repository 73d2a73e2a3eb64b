//! Per-channel shared state
//!
//! Shared between the reader thread and command issuers:
//! - `inner` (mutex): link writer, pending command, closed and recovery flags
//! - `cond`: signalled when the pending command completes or the link closes
//! - `settings` (rwlock): name, timeout, default flag, rules, callbacks
//!
//! Lock order: `settings` is never held while taking `inner`. Callers take a
//! cloned `Settings` snapshot first, then lock `inner`.

use super::classify::{classify, Disposition, Pending, ResponseRules};
use super::command::{Command, CommandKind, Response};
use super::stats::ChannelStats;
use crate::constants::{COMMAND_TERMINATOR, CTRL_Z, MAX_COMMAND_NAME_LEN};
use crate::error::AtError;
use crate::logging::{TrafficEntry, TrafficLog};
use crate::transport::Closer;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Handler for unsolicited lines: `(line, second_line)`
///
/// `second_line` is set for two-line SMS notifications.
pub type UnsolicitedFn = Arc<dyn Fn(&str, Option<&str>) + Send + Sync>;

/// Parameterless channel event callback (timeout, reader closed)
pub type ChannelCallback = Arc<dyn Fn() + Send + Sync>;

// =============================================================================
// Pending command
// =============================================================================

/// The single command waiting for its final response
pub(crate) struct PendingCommand {
    /// Command text, truncated; used for the `NO CARRIER` rule
    name: String,
    kind: CommandKind,
    prefix: Option<String>,
    sms_pdu: Option<String>,
    sink: Option<BufWriter<File>>,
    response: Response,
    completed: bool,
}

impl PendingCommand {
    fn new(command: Command, sink: Option<BufWriter<File>>) -> Self {
        Self {
            name: command.text.chars().take(MAX_COMMAND_NAME_LEN).collect(),
            kind: command.kind,
            prefix: command.prefix,
            sms_pdu: command.sms_pdu,
            sink,
            response: Response::default(),
            completed: false,
        }
    }

    fn view(&self) -> Pending<'_> {
        Pending {
            command: &self.name,
            kind: self.kind,
            prefix: self.prefix.as_deref(),
            has_intermediate: !self.response.intermediates.is_empty(),
            awaiting_prompt: self.sms_pdu.is_some(),
            completed: self.completed,
        }
    }

    fn finish(mut self) -> Response {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.flush() {
                warn!("Failed to flush command output file: {}", e);
            }
        }
        self.response
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Channel parameters, set at open and adjustable afterwards
#[derive(Clone)]
pub(crate) struct Settings {
    pub name: String,
    pub command_timeout: Duration,
    pub is_default: bool,
    pub rules: Arc<ResponseRules>,
    pub unsolicited: Option<UnsolicitedFn>,
    pub on_timeout: Option<ChannelCallback>,
    pub on_reader_closed: Option<ChannelCallback>,
    pub traffic: Option<TrafficLog>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: String::new(),
            command_timeout: Duration::ZERO,
            is_default: false,
            rules: Arc::new(ResponseRules::default()),
            unsolicited: None,
            on_timeout: None,
            on_reader_closed: None,
            traffic: None,
        }
    }
}

// =============================================================================
// Channel state
// =============================================================================

pub(crate) struct Inner {
    writer: Option<Box<dyn Write + Send>>,
    pending: Option<PendingCommand>,
    closed: bool,
    /// Set after an escalated timeout; commands fail fast with this code
    recovery: Option<AtError>,
}

impl Inner {
    fn detached() -> Self {
        Self {
            writer: None,
            pending: None,
            closed: false,
            recovery: None,
        }
    }

    fn is_resolved(&self) -> bool {
        self.closed || self.pending.as_ref().map_or(true, |p| p.completed)
    }
}

pub(crate) struct ChannelState {
    inner: Mutex<Inner>,
    cond: Condvar,
    settings: RwLock<Settings>,
    reader_thread: Mutex<Option<ThreadId>>,
    closer: Mutex<Option<Box<dyn Closer>>>,
    pub(crate) stats: ChannelStats,
}

impl ChannelState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::detached()),
            cond: Condvar::new(),
            settings: RwLock::new(Settings::default()),
            reader_thread: Mutex::new(None),
            closer: Mutex::new(None),
            stats: ChannelStats::default(),
        }
    }

    /// Hook a freshly opened link into this state
    pub fn attach(&self, writer: Box<dyn Write + Send>, closer: Box<dyn Closer>, settings: Settings) {
        let name = settings.name.clone();
        *self.settings.write() = settings;
        {
            let mut inner = self.inner.lock();
            if inner.writer.is_some() && !inner.closed {
                warn!("AT({}) reopened while still attached", name);
            }
            *inner = Inner::detached();
            inner.writer = Some(writer);
        }
        *self.closer.lock() = Some(closer);
        *self.reader_thread.lock() = None;
        self.stats.reset();
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut Settings)) {
        f(&mut self.settings.write());
    }

    pub fn name(&self) -> String {
        self.settings.read().name.clone()
    }

    pub fn set_reader_thread(&self, id: ThreadId) {
        *self.reader_thread.lock() = Some(id);
    }

    pub fn reader_thread(&self) -> Option<ThreadId> {
        *self.reader_thread.lock()
    }

    pub fn is_reader_thread(&self) -> bool {
        self.reader_thread() == Some(thread::current().id())
    }

    pub fn is_closed(&self) -> bool {
        let inner = self.inner.lock();
        inner.closed || inner.writer.is_none()
    }

    /// Never attached to a link
    pub fn is_fresh(&self) -> bool {
        let inner = self.inner.lock();
        !inner.closed && inner.writer.is_none()
    }

    pub fn recovery(&self) -> Option<AtError> {
        self.inner.lock().recovery
    }

    pub fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    // =========================================================================
    // Command side
    // =========================================================================

    /// Fail fast if an escalated timeout put the channel in recovery
    pub fn check_recovery(&self, inner: &Inner) -> Result<(), AtError> {
        match inner.recovery {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    pub fn enter_recovery(&self, inner: &mut Inner, code: AtError) {
        inner.recovery = Some(code);
    }

    /// Transmit `command` and wait for its final response
    ///
    /// Caller holds the lock; the wait releases it. The pending slot is
    /// always empty again when this returns.
    pub fn execute(
        &self,
        inner: &mut MutexGuard<'_, Inner>,
        settings: &Settings,
        command: Command,
        sink: Option<BufWriter<File>>,
        timeout: Duration,
    ) -> Result<Response, AtError> {
        if inner.pending.is_some() {
            return Err(AtError::CommandPending);
        }

        let shown = command.log_text().to_string();
        self.write_command(inner, settings, command.text(), &shown)?;
        self.stats.record_command();
        inner.pending = Some(PendingCommand::new(command, sink));

        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        while !inner.is_resolved() {
            match deadline {
                Some(deadline) => {
                    let timed_out = self.cond.wait_until(inner, deadline).timed_out();
                    if timed_out && !inner.is_resolved() {
                        inner.pending = None;
                        warn!(
                            "AT({}) {} timed out after {} ms",
                            settings.name,
                            shown,
                            timeout.as_millis()
                        );
                        return Err(AtError::Timeout);
                    }
                }
                None => self.cond.wait(inner),
            }
        }

        let pending = inner.pending.take();
        if inner.closed {
            return Err(AtError::ChannelClosed);
        }
        pending.map(PendingCommand::finish).ok_or(AtError::Generic)
    }

    fn write_command(
        &self,
        inner: &mut Inner,
        settings: &Settings,
        text: &str,
        shown: &str,
    ) -> Result<(), AtError> {
        if inner.closed {
            return Err(AtError::ChannelClosed);
        }
        let Some(writer) = inner.writer.as_mut() else {
            return Err(AtError::ChannelClosed);
        };

        debug!("AT({})> {}", settings.name, shown);
        if let Some(log) = &settings.traffic {
            log.record(TrafficEntry::outgoing(&settings.name, shown));
        }

        let written = writer
            .write_all(text.as_bytes())
            .and_then(|_| writer.write_all(COMMAND_TERMINATOR))
            .and_then(|_| writer.flush());
        if let Err(e) = written {
            error!("AT({}) write failed: {}", settings.name, e);
            return Err(AtError::Generic);
        }
        self.stats.add_tx(text.len() + COMMAND_TERMINATOR.len());
        Ok(())
    }

    fn write_payload(&self, inner: &mut Inner, settings: &Settings, pdu: &str) {
        let Some(writer) = inner.writer.as_mut() else {
            warn!("AT({}) data prompt on a detached channel", settings.name);
            return;
        };

        debug!("AT({})> {}^Z", settings.name, pdu);
        if let Some(log) = &settings.traffic {
            log.record(TrafficEntry::payload(&settings.name, pdu.len()));
        }

        let written = writer
            .write_all(pdu.as_bytes())
            .and_then(|_| writer.write_all(&[CTRL_Z]))
            .and_then(|_| writer.flush());
        match written {
            Ok(()) => self.stats.add_tx(pdu.len() + 1),
            Err(e) => error!("AT({}) payload write failed: {}", settings.name, e),
        }
    }

    // =========================================================================
    // Reader side
    // =========================================================================

    /// Route one line from the reader thread
    pub fn process_line(&self, line: &str) {
        let settings = self.settings();
        let mut inner = self.inner.lock();

        let disposition = {
            let view = inner.pending.as_ref().map(PendingCommand::view);
            classify(line, view.as_ref(), &settings.rules)
        };
        if disposition != Disposition::ToFile {
            self.log_incoming(&settings, line);
        }

        match disposition {
            Disposition::Final { success } => {
                if let Some(pending) = inner.pending.as_mut() {
                    pending.response.success = success;
                    pending.response.final_line = Some(line.to_string());
                    pending.name.clear();
                    pending.completed = true;
                }
                self.cond.notify_all();
            }
            Disposition::SmsPrompt => {
                let pdu = inner.pending.as_mut().and_then(|p| p.sms_pdu.take());
                if let Some(pdu) = pdu {
                    self.write_payload(&mut inner, &settings, &pdu);
                }
            }
            Disposition::Intermediate => {
                if let Some(pending) = inner.pending.as_mut() {
                    pending.response.intermediates.push(line.to_string());
                }
            }
            Disposition::ToFile => {
                let sink = inner.pending.as_mut().and_then(|p| p.sink.as_mut());
                match sink {
                    Some(sink) => {
                        if let Err(e) = writeln!(sink, "{}", line) {
                            warn!("AT({}) output file write failed: {}", settings.name, e);
                        }
                    }
                    None => error!("AT({}) no output file for command", settings.name),
                }
            }
            Disposition::Unsolicited => {
                drop(inner);
                self.dispatch_unsolicited(&settings, line, None);
            }
        }
    }

    pub fn log_incoming(&self, settings: &Settings, line: &str) {
        debug!("AT({})< {}", settings.name, line);
        if let Some(log) = &settings.traffic {
            log.record(TrafficEntry::incoming(&settings.name, line));
        }
    }

    /// Hand an unsolicited line to the handler (default channel only)
    pub fn dispatch_unsolicited(&self, settings: &Settings, line: &str, second: Option<&str>) {
        if !settings.is_default {
            return;
        }
        self.stats.record_unsolicited();
        if let Some(handler) = &settings.unsolicited {
            handler(line, second);
        }
    }

    /// Reader hit end of stream
    ///
    /// Wakes any waiter. The closed callback only fires when nobody closed
    /// the channel on purpose and it is not in timeout recovery.
    pub fn reader_closed(&self) {
        let settings = self.settings();
        let unexpected = {
            let mut inner = self.inner.lock();
            let unexpected = !inner.closed && inner.recovery.is_none();
            inner.closed = true;
            self.cond.notify_all();
            unexpected
        };

        info!("AT({}) reader closed", settings.name);
        if let Some(log) = &settings.traffic {
            log.record(TrafficEntry::system(&settings.name, "reader closed"));
        }
        if unexpected {
            if let Some(callback) = &settings.on_reader_closed {
                callback();
            }
        }
    }

    /// Close the link on purpose: fail waiters and unblock the reader
    pub fn close_link(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.writer = None;
            self.cond.notify_all();
        }
        if let Some(closer) = self.closer.lock().take() {
            closer.close();
        }
    }
}
