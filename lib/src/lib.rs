//! # ferry-lib, a non-blocking HTTP/1.0 forwarding proxy engine
//!
//! ferry accepts client connections on a TCP port, reads one request per
//! connection, and forwards `GET http://<host>/ HTTP/1.0` requests to the
//! named host. The upstream answer is relayed back to the client and both
//! connections are closed. Anything else gets a short fixed answer.
//!
//! Everything happens on a single thread, driven by an edge-triggered
//! readiness [`selector::Selector`]. Every socket is non-blocking, so a
//! slow peer only suspends its own connection.
//!
//! The pieces, bottom up:
//!
//! - [`resolver`]: host name to IPv4 address resolution
//! - [`socket`]: non-blocking IPv4 TCP sockets and their [`socket::Status`]
//! - [`ready`]: the readiness bitset shared by the selector and its callers
//! - [`selector`]: registration of sockets with a callback, and the
//!   dispatch loop
//! - [`protocol`]: request-line parsing, message boundaries, fixed answers
//! - [`connection`]: the per-client state machine
//! - [`server`]: the listener, the connection table and the event loop
//!
//! ```no_run
//! use ferry_command_lib::config::ProxyConfig;
//! use ferry_lib::server::Proxy;
//!
//! let config = ProxyConfig::builder(5555).build().expect("invalid configuration");
//! let mut proxy = Proxy::new(config).expect("could not start the proxy");
//! proxy.run().expect("the event loop failed");
//! ```

#[macro_use]
extern crate log;

pub mod connection;
pub mod protocol;
pub mod ready;
pub mod resolver;
pub mod selector;
pub mod server;
pub mod socket;
