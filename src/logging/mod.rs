//! Logging
//!
//! Two independent outputs:
//! - `tracing` diagnostics (`init_tracing`), used throughout the crate
//! - `TrafficLog`: optional rotating file of every AT line in and out

pub mod entry;
pub mod file;

pub use entry::{Direction, TrafficEntry, TrafficKind};
pub use file::{spawn_file_logger, FileLoggerConfig};

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

/// Initialize tracing for diagnostic output
///
/// Call early in main() before any logging occurs.
/// Set `verbose` to true for debug-level output (includes AT traffic).
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { "debug" } else { "warn" };

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_file(false)
                .compact(),
        )
        .with(tracing_subscriber::EnvFilter::new(level))
        .try_init();
}

/// Non-blocking sink for traffic entries
///
/// Cloned into every channel. Entries are dropped when the writer
/// falls behind; channel threads never wait on disk I/O.
#[derive(Debug, Clone)]
pub struct TrafficLog {
    tx: SyncSender<TrafficEntry>,
}

impl TrafficLog {
    /// Create a sink and its receiving end (the file logger, or a test)
    pub fn channel(capacity: usize) -> (Self, Receiver<TrafficEntry>) {
        let (tx, rx) = sync_channel(capacity.max(1));
        (Self { tx }, rx)
    }

    #[inline]
    pub fn record(&self, entry: TrafficEntry) {
        let _ = self.tx.try_send(entry);
    }
}
