//! Command-line interface definition using clap

use crate::transport::DeviceKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// AT-command channel tool for cellular modems
#[derive(Parser, Debug)]
#[command(name = "atc")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose debug output (includes AT traffic)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: atc.toml in the working directory)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Response shape expected from a command
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expect {
    /// Only a final line
    #[default]
    None,
    /// One line starting with --prefix
    Single,
    /// One line starting with a digit
    Numeric,
    /// Any number of lines starting with --prefix
    Multi,
    /// Any number of lines without a common prefix
    MultiNoPrefix,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one command and print the response
    Send {
        /// Device to open (overrides the configured default channel)
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,

        /// Device kind: tty, socket or loopback
        #[arg(long, value_name = "KIND")]
        kind: Option<DeviceKind>,

        /// Command timeout in milliseconds (0 = wait forever)
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Expected response shape
        #[arg(long, value_enum, default_value_t = Expect::None)]
        expect: Expect,

        /// Intermediate line prefix for `single` and `multi`
        #[arg(long, value_name = "PREFIX")]
        prefix: Option<String>,

        /// Print the response as JSON
        #[arg(long)]
        json: bool,

        /// Run the ATE0Q0V1 handshake first
        #[arg(long)]
        handshake: bool,

        /// AT command text, e.g. AT+CSQ
        command: String,
    },

    /// Print unsolicited lines until the device closes
    Monitor {
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,

        #[arg(long, value_name = "KIND")]
        kind: Option<DeviceKind>,
    },

    /// Start every configured channel; stdin lines are sent on the default channel
    Run,
}

// =============================================================================
// Tests
// =============================================================================
