//! ferry logs
//!
//! Every crate logs through the `log` facade. This module holds the
//! backend: a [`Logger`] writing one line per record to a [`LogTarget`]
//! (standard output unless told otherwise).
//!
//! The proxy's only contracted log line, emitted when a request is accepted
//! for forwarding, goes through the same sink at `info` level.

pub mod logs;
pub mod target;

use std::net::AddrParseError;

pub use crate::logging::logs::*;
pub use crate::logging::target::*;

#[derive(thiserror::Error, Debug)]
pub enum LogError {
    #[error("invalid log target {0}: {1}")]
    InvalidLogTarget(String, &'static str),
    #[error("invalid log target {0}: {1}")]
    InvalidSocketAddress(String, AddrParseError),
    #[error("invalid log level {0}")]
    InvalidLogLevel(String),
    #[error("could not open log file {0}: {1}")]
    OpenFile(String, std::io::Error),
    #[error("could not connect to TCP socket {0}: {1}")]
    TcpConnect(String, std::io::Error),
    #[error("a logger is already installed")]
    AlreadyInstalled,
}
