//! Response classification
//!
//! Decides what one received line means for the command currently in
//! flight. Pure: no I/O, no locking. The caller holds the channel lock and
//! applies the returned `Disposition`.

use super::CommandKind;
use crate::constants::SMS_PROMPT;
use serde::{Deserialize, Serialize};

/// Lines that begin with one of these end a command with failure
const FINAL_ERROR_PREFIXES: &[&str] = &[
    "+CMS ERROR:",
    "+CME ERROR:",
    "NO ANSWER",
    "NO DIALTONE",
    "+CCHC ERROR",
];

const NO_CARRIER: &str = "NO CARRIER";

/// Table-driven parts of classification, loaded from config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseRules {
    /// Commands (by prefix) for which `NO CARRIER` is the final response.
    /// For anything else it is a call-drop notice and goes unsolicited.
    pub no_carrier_final: Vec<String>,
    /// Lines never taken as intermediates of a multi-line-no-prefix command
    pub unsolicited_prefixes: Vec<String>,
    /// Unsolicited notifications followed by a second (PDU) line
    pub sms_unsolicited_prefixes: Vec<String>,
}

impl Default for ResponseRules {
    fn default() -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            no_carrier_final: owned(&["ATD", "ATA", "ATO", "AT+CGACT"]),
            unsolicited_prefixes: owned(&[
                "+C",
                "*T",
                "%I",
                "RING",
                "NO CARRIER",
                "%NWSTATE",
                "%ICTI",
            ]),
            sms_unsolicited_prefixes: owned(&["+CMT:", "+CDS:", "+CBM:"]),
        }
    }
}

impl ResponseRules {
    pub fn is_no_carrier_final(&self, command: &str) -> bool {
        self.no_carrier_final
            .iter()
            .any(|c| command.starts_with(c.as_str()))
    }

    pub fn is_unsolicited(&self, line: &str) -> bool {
        self.unsolicited_prefixes
            .iter()
            .any(|p| line.starts_with(p.as_str()))
    }

    pub fn is_sms_unsolicited(&self, line: &str) -> bool {
        self.sms_unsolicited_prefixes
            .iter()
            .any(|p| line.starts_with(p.as_str()))
    }
}

/// What the in-flight command looks like to the classifier
#[derive(Debug, Clone, Copy)]
pub struct Pending<'a> {
    /// Command text (possibly truncated)
    pub command: &'a str,
    pub kind: CommandKind,
    /// Required prefix for intermediate lines (`None` accepts any line)
    pub prefix: Option<&'a str>,
    /// Whether an intermediate line has been recorded already
    pub has_intermediate: bool,
    /// Whether a payload is waiting for the data prompt
    pub awaiting_prompt: bool,
    /// Whether the final response has been recorded already
    pub completed: bool,
}

/// Outcome of classifying one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Ends the command
    Final { success: bool },
    /// Data prompt: send the queued payload now
    SmsPrompt,
    /// Part of the command's response
    Intermediate,
    /// Goes to the command's output file
    ToFile,
    /// Not part of any command
    Unsolicited,
}

/// `OK` or any `CONNECT...`
pub fn is_final_success(line: &str) -> bool {
    line == "OK" || line.starts_with("CONNECT")
}

/// Error finals; `NO CARRIER` only counts for commands that expect it
pub fn is_final_error(line: &str, command: &str, rules: &ResponseRules) -> bool {
    line == "ERROR"
        || FINAL_ERROR_PREFIXES.iter().any(|p| line.starts_with(p))
        || (line.starts_with(NO_CARRIER) && rules.is_no_carrier_final(command))
}

/// Classify `line` against the pending command
pub fn classify(line: &str, pending: Option<&Pending<'_>>, rules: &ResponseRules) -> Disposition {
    let Some(p) = pending.filter(|p| !p.completed) else {
        return Disposition::Unsolicited;
    };

    if is_final_success(line) {
        return Disposition::Final { success: true };
    }
    if is_final_error(line, p.command, rules) {
        return Disposition::Final { success: false };
    }
    if p.awaiting_prompt && line == SMS_PROMPT {
        return Disposition::SmsPrompt;
    }

    let has_prefix = p.prefix.map_or(true, |prefix| line.starts_with(prefix));
    let intermediate = match p.kind {
        CommandKind::NoResult => false,
        CommandKind::Numeric => {
            !p.has_intermediate && line.bytes().next().is_some_and(|b| b.is_ascii_digit())
        }
        CommandKind::SingleLine => !p.has_intermediate && has_prefix,
        CommandKind::MultiLine => has_prefix,
        CommandKind::MultiLineNoPrefix => !rules.is_unsolicited(line),
        CommandKind::ToFile => return Disposition::ToFile,
    };

    if intermediate {
        Disposition::Intermediate
    } else {
        Disposition::Unsolicited
    }
}
