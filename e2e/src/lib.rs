//! End-to-end harness for ferry: a proxy running on its own thread,
//! mock upstream servers and blocking clients talking to it over loopback.

#[macro_use]
extern crate log;

pub mod ferry;
pub mod http_utils;
pub mod mock;
pub mod tests;

/// size of the read buffers of mock clients and backends
pub const BUFFER_SIZE: usize = 4096;
