//! Per-channel counters
//!
//! Lock-free atomics, written by the reader thread and command issuers,
//! read from anywhere via `snapshot()`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ChannelStats {
    /// Bytes written to the modem (commands and payloads)
    tx_total: AtomicU64,
    /// Bytes read from the modem
    rx_total: AtomicU64,
    commands: AtomicU64,
    timeouts: AtomicU64,
    unsolicited: AtomicU64,
    /// Lines dropped because they overflowed the read buffer
    overflows: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub commands: u64,
    pub timeouts: u64,
    pub unsolicited: u64,
    pub overflows: u64,
}

impl ChannelStats {
    #[inline]
    pub fn add_tx(&self, bytes: usize) {
        self.tx_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Publish the reader's running totals
    #[inline]
    pub fn set_rx(&self, total: u64, overflows: u64) {
        self.rx_total.store(total, Ordering::Relaxed);
        self.overflows.store(overflows, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unsolicited(&self) {
        self.unsolicited.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset everything (channel reopened)
    pub fn reset(&self) {
        for counter in [
            &self.tx_total,
            &self.rx_total,
            &self.commands,
            &self.timeouts,
            &self.unsolicited,
            &self.overflows,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tx_bytes: self.tx_total.load(Ordering::Relaxed),
            rx_bytes: self.rx_total.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            unsolicited: self.unsolicited.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
        }
    }
}
