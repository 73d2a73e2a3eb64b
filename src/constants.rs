//! Crate-wide constants
//!
//! Centralized constants for framing, timing and defaults.

// =============================================================================
// Framing
// =============================================================================

/// Capacity of the per-channel line buffer (bytes)
pub const MAX_AT_RESPONSE: usize = 8 * 1024;

/// Maximum length of the pending command name kept for final-response checks
pub const MAX_COMMAND_NAME_LEN: usize = 64;

/// Data prompt sent by the modem before an SMS payload (no line terminator)
pub const SMS_PROMPT: &str = "> ";

/// End-of-data marker written after an SMS payload (Ctrl-Z)
pub const CTRL_Z: u8 = 0x1A;

/// Terminator appended to every command line
pub const COMMAND_TERMINATOR: &[u8] = b"\r";

// =============================================================================
// Timing - Commands
// =============================================================================

/// Default command timeout for a channel (milliseconds, 0 = wait forever)
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 60_000;

/// How long the worker waits for the reader thread to register (milliseconds)
pub const READER_READY_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// Handshake
// =============================================================================

/// Command used to put the modem into a known echo/verbosity state
pub const HANDSHAKE_COMMAND: &str = "ATE0Q0V1";

/// Handshake attempts before giving up
pub const HANDSHAKE_RETRY_COUNT: u32 = 10;

/// Per-attempt handshake timeout (milliseconds)
pub const HANDSHAKE_TIMEOUT_MS: u64 = 1_000;

/// Pause after a successful handshake so stray replies drain (milliseconds)
pub const HANDSHAKE_SETTLE_MS: u64 = 1_000;

// =============================================================================
// Device
// =============================================================================

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial read poll interval, used to notice a close request (milliseconds)
pub const SERIAL_POLL_TIMEOUT_MS: u64 = 100;

/// Device open attempts before giving up
pub const DEFAULT_OPEN_RETRIES: u32 = 10;

/// Delay between device open attempts (milliseconds)
pub const OPEN_RETRY_DELAY_MS: u64 = 1_000;

// =============================================================================
// Traffic log
// =============================================================================

/// Size at which the traffic log rotates (bytes)
pub const TRAFFIC_LOG_MAX_BYTES: u64 = 4 * 1024 * 1024;

/// Number of rotated traffic log files kept
pub const TRAFFIC_LOG_MAX_FILES: usize = 3;

/// Flush interval of the traffic log writer (milliseconds)
pub const TRAFFIC_LOG_FLUSH_MS: u64 = 250;

/// Queue capacity between channels and the traffic log writer
pub const TRAFFIC_LOG_CAPACITY: usize = 1024;
