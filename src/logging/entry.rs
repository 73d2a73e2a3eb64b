//! Traffic log entry types

use serde::{Deserialize, Serialize};

/// Direction of an AT line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    In,  // Modem -> Host
    Out, // Host -> Modem
}

/// Type of traffic entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrafficKind {
    /// Command or response line (commands carry their loggable text)
    Line { direction: Direction, text: String },
    /// Binary payload sent after a data prompt (content not recorded)
    Payload { size: usize },
    /// Channel lifecycle message
    System { message: String },
}

/// One traffic entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub timestamp: String, // HH:MM:SS.mmm
    pub channel: String,
    pub kind: TrafficKind,
}

impl TrafficEntry {
    /// Current timestamp as HH:MM:SS.mmm
    #[inline]
    fn now() -> String {
        chrono::Local::now().format("%H:%M:%S%.3f").to_string()
    }

    fn new(channel: &str, kind: TrafficKind) -> Self {
        Self {
            timestamp: Self::now(),
            channel: channel.to_string(),
            kind,
        }
    }

    /// Line received from the modem
    pub fn incoming(channel: &str, text: impl Into<String>) -> Self {
        Self::new(
            channel,
            TrafficKind::Line {
                direction: Direction::In,
                text: text.into(),
            },
        )
    }

    /// Command sent to the modem
    pub fn outgoing(channel: &str, text: impl Into<String>) -> Self {
        Self::new(
            channel,
            TrafficKind::Line {
                direction: Direction::Out,
                text: text.into(),
            },
        )
    }

    /// Payload sent after the data prompt
    pub fn payload(channel: &str, size: usize) -> Self {
        Self::new(channel, TrafficKind::Payload { size })
    }

    /// Lifecycle message
    pub fn system(channel: &str, message: impl Into<String>) -> Self {
        Self::new(
            channel,
            TrafficKind::System {
                message: message.into(),
            },
        )
    }
}
