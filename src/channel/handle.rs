//! Command dispatch
//!
//! `ChannelHandle` is the cheap, cloneable handle business logic uses to
//! talk to a channel. Every send blocks the calling thread until the final
//! response arrives, the timeout expires, or the link closes. At most one
//! command is in flight per channel; a second concurrent send fails with
//! `CommandPending` instead of queueing.

use super::command::{Command, CommandKind, Response};
use super::state::{ChannelCallback, ChannelState};
use super::stats::StatsSnapshot;
use crate::config::HandshakeConfig;
use crate::error::AtError;
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct ChannelHandle {
    state: Arc<ChannelState>,
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("name", &self.name())
            .finish()
    }
}

impl ChannelHandle {
    pub(crate) fn from_state(state: Arc<ChannelState>) -> Self {
        Self { state }
    }

    pub(crate) fn state(&self) -> &Arc<ChannelState> {
        &self.state
    }

    pub fn name(&self) -> String {
        self.state.name()
    }

    /// Whether both handles refer to the same channel
    pub fn same_channel(&self, other: &ChannelHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub fn is_default(&self) -> bool {
        self.state.settings().is_default
    }

    /// Whether the link is open and commands can be sent
    pub fn is_ready(&self) -> bool {
        !self.state.is_closed() && self.state.recovery().is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Close the link: waiting senders get `ChannelClosed`, the reader sees
    /// end-of-stream. Registrations stay until the owner tears down.
    pub(crate) fn close(&self) {
        self.state.close_link();
    }

    /// Error code stored by timeout escalation, if any
    pub fn error_recovery(&self) -> Option<AtError> {
        self.state.recovery()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.state.stats.snapshot()
    }

    pub fn command_timeout(&self) -> Duration {
        self.state.settings().command_timeout
    }

    /// Default timeout for commands without their own (zero = forever)
    pub fn set_command_timeout(&self, timeout: Duration) {
        self.state.update_settings(|s| s.command_timeout = timeout);
    }

    /// Called once when a command times out; puts the channel in recovery
    pub fn set_on_timeout(&self, callback: impl Fn() + Send + Sync + 'static) {
        let callback: ChannelCallback = Arc::new(callback);
        self.state.update_settings(|s| s.on_timeout = Some(callback));
    }

    /// Called on the reader thread when the link closes unexpectedly
    pub fn set_on_reader_closed(&self, callback: impl Fn() + Send + Sync + 'static) {
        let callback: ChannelCallback = Arc::new(callback);
        self.state.update_settings(|s| s.on_reader_closed = Some(callback));
    }

    // =========================================================================
    // Send
    // =========================================================================

    /// Send `command` and wait for its final response
    ///
    /// # Errors
    ///
    /// - `InvalidThread` when called from the channel's reader thread
    /// - the stored recovery code after an escalated timeout
    /// - `CommandPending` while another command is in flight
    /// - `ChannelClosed` / `Generic` when the link is gone or the write fails
    /// - `Timeout` when no final response arrives in time
    pub fn send(&self, command: Command) -> Result<Response, AtError> {
        let state = &self.state;
        let settings = state.settings();

        if state.is_reader_thread() {
            error!(
                "AT({}) {} issued from the reader thread",
                settings.name,
                command.log_text()
            );
            return Err(AtError::InvalidThread);
        }

        let sink = self.open_sink(&command)?;
        let timeout = command
            .timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(settings.command_timeout);

        let mut inner = state.lock();
        if let Err(code) = state.check_recovery(&inner) {
            error!(
                "AT({}) in error recovery, not sending {}",
                settings.name,
                command.log_text()
            );
            return Err(code);
        }

        let result = state.execute(&mut inner, &settings, command, sink, timeout);
        let escalate = matches!(result, Err(AtError::Timeout)) && settings.on_timeout.is_some();
        if escalate {
            state.enter_recovery(&mut inner, AtError::Timeout);
        }
        drop(inner);

        if matches!(result, Err(AtError::Timeout)) {
            state.stats.record_timeout();
        }
        if escalate {
            if let Some(callback) = &settings.on_timeout {
                callback();
            }
        }
        result
    }

    fn open_sink(&self, command: &Command) -> Result<Option<BufWriter<File>>, AtError> {
        if command.kind != CommandKind::ToFile {
            return Ok(None);
        }
        let Some(path) = command.output.as_deref() else {
            warn!("{} has no output file, response lines dropped", command.log_text());
            return Ok(None);
        };
        match File::create(path) {
            Ok(file) => Ok(Some(BufWriter::new(file))),
            Err(e) => {
                error!("Cannot open {}: {}", path.display(), e);
                Err(AtError::Generic)
            }
        }
    }

    /// Put the modem in a known state (echo off, verbose results)
    ///
    /// Retries the handshake command with a short timeout, holding the
    /// channel across attempts. Timeouts here never escalate.
    pub fn handshake(&self, config: &HandshakeConfig) -> Result<(), AtError> {
        let state = &self.state;
        if state.is_reader_thread() {
            error!("AT({}) handshake from the reader thread", state.name());
            return Err(AtError::InvalidThread);
        }

        let settings = state.settings();
        let timeout = Duration::from_millis(config.timeout_ms);
        let attempts = config.retries.max(1);
        let mut result = Err(AtError::Timeout);
        {
            let mut inner = state.lock();
            for attempt in 1..=attempts {
                let command = Command::new(config.command.as_str());
                result = state
                    .execute(&mut inner, &settings, command, None, timeout)
                    .map(|_| ());
                match result {
                    Err(AtError::Timeout) => {
                        debug!(
                            "AT({}) handshake attempt {}/{} timed out",
                            settings.name, attempt, attempts
                        );
                    }
                    _ => break,
                }
            }
        }

        match result {
            Ok(()) => {
                // Let duplicate replies drain as unsolicited lines.
                thread::sleep(Duration::from_millis(config.settle_ms));
                info!("AT({}) handshake complete", settings.name);
                Ok(())
            }
            Err(e) => {
                warn!("AT({}) handshake failed: {}", settings.name, e);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Send variants
    // =========================================================================

    /// Command with no intermediate response
    pub fn send_command(&self, text: &str) -> Result<Response, AtError> {
        self.send(Command::new(text))
    }

    pub fn send_command_secure(&self, text: &str, log_text: &str) -> Result<Response, AtError> {
        self.send(Command::new(text).log_as(log_text))
    }

    /// Command answered by exactly one `prefix` line
    pub fn send_singleline(&self, text: &str, prefix: &str) -> Result<Response, AtError> {
        self.send(Command::single_line(text, prefix))
            .and_then(require_line)
    }

    pub fn send_singleline_secure(
        &self,
        text: &str,
        log_text: &str,
        prefix: &str,
    ) -> Result<Response, AtError> {
        self.send(Command::single_line(text, prefix).log_as(log_text))
            .and_then(require_line)
    }

    /// Command answered by one line starting with a digit
    pub fn send_numeric(&self, text: &str) -> Result<Response, AtError> {
        self.send(Command::numeric(text)).and_then(require_line)
    }

    pub fn send_numeric_secure(&self, text: &str, log_text: &str) -> Result<Response, AtError> {
        self.send(Command::numeric(text).log_as(log_text))
            .and_then(require_line)
    }

    /// Command answered by any number of `prefix` lines
    pub fn send_multiline(&self, text: &str, prefix: &str) -> Result<Response, AtError> {
        self.send(Command::multi_line(text, prefix))
    }

    pub fn send_multiline_secure(
        &self,
        text: &str,
        log_text: &str,
        prefix: &str,
    ) -> Result<Response, AtError> {
        self.send(Command::multi_line(text, prefix).log_as(log_text))
    }

    /// Command answered by free-form lines
    pub fn send_multiline_no_prefix(&self, text: &str) -> Result<Response, AtError> {
        self.send(Command::multi_line_no_prefix(text))
    }

    pub fn send_multiline_no_prefix_secure(
        &self,
        text: &str,
        log_text: &str,
    ) -> Result<Response, AtError> {
        self.send(Command::multi_line_no_prefix(text).log_as(log_text))
    }

    /// Command whose response lines are written to `path`
    ///
    /// The file is created (truncated) before sending; if that fails the
    /// command is not sent.
    pub fn send_to_file(&self, text: &str, path: &Path) -> Result<Response, AtError> {
        self.send(Command::to_file(text, path))
    }

    pub fn send_to_file_secure(
        &self,
        text: &str,
        log_text: &str,
        path: &Path,
    ) -> Result<Response, AtError> {
        self.send(Command::to_file(text, path).log_as(log_text))
    }

    /// Two-step SMS submit: `pdu` goes out once the modem prompts for it
    pub fn send_sms(&self, text: &str, pdu: &str, prefix: &str) -> Result<Response, AtError> {
        self.send(Command::single_line(text, prefix).sms_pdu(pdu))
            .and_then(require_line)
    }
}

/// Downgrade a success without any intermediate line
fn require_line(response: Response) -> Result<Response, AtError> {
    if response.success && response.intermediates.is_empty() {
        Err(AtError::InvalidResponse)
    } else {
        Ok(response)
    }
}
