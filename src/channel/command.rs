//! Commands and responses

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Expected response shape; decides which lines count as intermediates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CommandKind {
    /// No intermediate lines expected
    #[default]
    NoResult,
    /// One line starting with a digit
    Numeric,
    /// One line starting with the prefix
    SingleLine,
    /// Any number of lines starting with the prefix
    MultiLine,
    /// Any number of lines, except known unsolicited ones
    MultiLineNoPrefix,
    /// Every line goes to an output file
    ToFile,
}

/// A command to send on a channel
#[derive(Debug, Clone)]
pub struct Command {
    pub(crate) text: String,
    pub(crate) kind: CommandKind,
    pub(crate) prefix: Option<String>,
    pub(crate) sms_pdu: Option<String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) log_text: Option<String>,
    pub(crate) output: Option<PathBuf>,
}

impl Command {
    /// Command without intermediate lines
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: CommandKind::NoResult,
            prefix: None,
            sms_pdu: None,
            timeout: None,
            log_text: None,
            output: None,
        }
    }

    pub fn numeric(text: impl Into<String>) -> Self {
        Self::new(text).kind(CommandKind::Numeric)
    }

    pub fn single_line(text: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::new(text)
            .kind(CommandKind::SingleLine)
            .prefix(prefix)
    }

    pub fn multi_line(text: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::new(text).kind(CommandKind::MultiLine).prefix(prefix)
    }

    pub fn multi_line_no_prefix(text: impl Into<String>) -> Self {
        Self::new(text).kind(CommandKind::MultiLineNoPrefix)
    }

    /// Command whose response lines are written to `path`
    pub fn to_file(text: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let mut command = Self::new(text).kind(CommandKind::ToFile);
        command.output = Some(path.into());
        command
    }

    pub fn kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Payload sent (with Ctrl-Z) when the modem shows the `"> "` prompt
    pub fn sms_pdu(mut self, pdu: impl Into<String>) -> Self {
        self.sms_pdu = Some(pdu.into());
        self
    }

    /// Per-command timeout; zero falls back to the channel default
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Text shown in logs instead of the command (e.g. to hide a PIN)
    pub fn log_as(mut self, text: impl Into<String>) -> Self {
        self.log_text = Some(text.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn command_kind(&self) -> CommandKind {
        self.kind
    }

    /// What logs show for this command
    pub fn log_text(&self) -> &str {
        self.log_text.as_deref().unwrap_or(&self.text)
    }
}

/// Collected response to a command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Response {
    /// Whether the final line was a success final
    pub success: bool,
    /// The line that ended the command
    pub final_line: Option<String>,
    /// Intermediate lines, in arrival order
    pub intermediates: Vec<String>,
}

impl Response {
    /// First intermediate line (single-line and numeric commands)
    pub fn line(&self) -> Option<&str> {
        self.intermediates.first().map(String::as_str)
    }
}
