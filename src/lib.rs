//! AT-command channel engine for cellular modems
//!
//! - `channel`: line framing, response classification and the blocking
//!   one-command-at-a-time request/response protocol
//! - `transport`: byte links over serial ports, local sockets and loopback TCP
//! - `worker`: per-channel worker threads fed from a request queue
//! - `logging`, `config`, `error`: ambient plumbing shared by the above

pub mod channel;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod transport;
pub mod worker;
