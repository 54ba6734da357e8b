//! Blocking name resolution
//!
//! Resolution runs on the event loop thread and blocks it until the
//! system resolver answers. Only IPv4 addresses are kept, since every
//! socket the proxy opens is an IPv4 socket.

use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs},
};

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("could not resolve {host}:{port}: {error}")]
    Lookup {
        host: String,
        port: u16,
        error: std::io::Error,
    },
    #[error("no IPv4 address found for {host}:{port}")]
    NoIpv4Address { host: String, port: u16 },
}

/// A resolved connect or bind target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpAddress {
    address: SocketAddrV4,
}

impl IpAddress {
    /// Resolve `host` on `port`. An empty host designates every local
    /// interface, which is what a listening socket binds to.
    pub fn new(host: &str, port: u16) -> Result<Self, ResolveError> {
        if host.is_empty() {
            return Ok(Self::unspecified(port));
        }

        let addresses = (host, port)
            .to_socket_addrs()
            .map_err(|error| ResolveError::Lookup {
                host: host.to_owned(),
                port,
                error,
            })?;

        addresses
            .filter_map(|address| match address {
                SocketAddr::V4(address) => Some(IpAddress { address }),
                SocketAddr::V6(_) => None,
            })
            .next()
            .ok_or_else(|| ResolveError::NoIpv4Address {
                host: host.to_owned(),
                port,
            })
    }

    pub fn unspecified(port: u16) -> Self {
        IpAddress {
            address: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(self.address)
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }
}

impl From<SocketAddrV4> for IpAddress {
    fn from(address: SocketAddrV4) -> Self {
        IpAddress { address }
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.address.fmt(f)
    }
}
