//! Tools shared by the ferry proxy library and its binary
//!
//! - `config`: the proxy configuration, built from the command line,
//!   with the constants the connection engine relies on
//! - `logging`: a backend for the `log` facade writing to a configurable sink
//!   (standard output by default, standard error, a file or a TCP socket)

pub mod config;
pub mod logging;
