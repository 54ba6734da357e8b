//! Non-blocking TCP sockets
//!
//! A [`Socket`] owns exactly one IPv4 stream socket. It is non-blocking
//! from creation to drop, and every operation reports a [`Status`]:
//! `NotReady` is the "would block" case, to be retried on the next
//! readiness notification, while `Error` is terminal for the socket.

use std::{
    fmt,
    io::{self, ErrorKind, Read},
    os::fd::{AsRawFd, RawFd},
};

use socket2::{Domain, Protocol, SockAddr, Type};

use crate::resolver::IpAddress;

/// Outcome of an operation on a non-blocking socket
#[derive(Debug)]
pub enum Status<T = ()> {
    Done(T),
    /// the operation would block, retry it once the socket is ready
    NotReady,
    /// the error is only carried to be logged, the socket is unusable
    Error(io::Error),
}

impl<T> Status<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Status::Done(_))
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, Status::NotReady)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Status::Error(_))
    }

    fn from_error(error: io::Error) -> Self {
        if error.kind() == ErrorKind::WouldBlock {
            Status::NotReady
        } else {
            Status::Error(error)
        }
    }
}

pub struct Socket {
    inner: socket2::Socket,
    is_bound: bool,
    remote_host: String,
    remote_port: u16,
}

impl Socket {
    /// Open a fresh non-blocking IPv4 TCP socket
    pub fn new() -> io::Result<Socket> {
        let inner = socket2::Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        inner.set_nonblocking(true)?;
        Ok(Socket {
            inner,
            is_bound: false,
            remote_host: String::new(),
            remote_port: 0,
        })
    }

    /// Start connecting to `target`. `NotReady` means the connection is in
    /// progress: wait for writability, then check [`Socket::is_connected`].
    pub fn connect(&mut self, target: &IpAddress) -> Status {
        let address = target.socket_addr();
        self.remote_host = address.ip().to_string();
        self.remote_port = address.port();

        match self.inner.connect(&SockAddr::from(address)) {
            Ok(()) => Status::Done(()),
            Err(error) if error.raw_os_error() == Some(libc::EINPROGRESS) => Status::NotReady,
            Err(error) => Status::from_error(error),
        }
    }

    /// Check the progress of a connection started with [`Socket::connect`]
    pub fn is_connected(&self) -> Status {
        match self.inner.take_error() {
            Ok(None) => {}
            Ok(Some(error)) | Err(error) => return Status::Error(error),
        }

        match self.inner.peer_addr() {
            Ok(_) => Status::Done(()),
            Err(error)
                if error.kind() == ErrorKind::NotConnected
                    || error.raw_os_error() == Some(libc::ENOTCONN) =>
            {
                Status::NotReady
            }
            Err(error) => Status::from_error(error),
        }
    }

    /// Bind to `port` on every local interface
    pub fn bind(&mut self, port: u16) -> Status {
        self.bind_to(&IpAddress::unspecified(port))
    }

    pub fn bind_to(&mut self, address: &IpAddress) -> Status {
        if self.is_bound {
            return Status::Error(io::Error::new(
                ErrorKind::InvalidInput,
                "socket is already bound",
            ));
        }

        if let Err(error) = self.inner.set_reuse_address(true) {
            return Status::Error(error);
        }

        match self.inner.bind(&SockAddr::from(address.socket_addr())) {
            Ok(()) => {
                self.is_bound = true;
                Status::Done(())
            }
            Err(error) => Status::Error(error),
        }
    }

    /// Bind to `port` then listen, with the system's maximum backlog
    pub fn listen(&mut self, port: u16) -> Status {
        match self.bind(port) {
            Status::Done(()) => self.start_listening(),
            other => other,
        }
    }

    /// Listen on an already bound socket
    pub fn start_listening(&mut self) -> Status {
        if !self.is_bound {
            return Status::Error(io::Error::new(
                ErrorKind::InvalidInput,
                "cannot listen on an unbound socket",
            ));
        }

        match self.inner.listen(libc::SOMAXCONN) {
            Ok(()) => Status::Done(()),
            Err(error) => Status::Error(error),
        }
    }

    /// Accept one pending connection. The accepted socket is non-blocking
    /// and knows its peer's address and port.
    pub fn accept(&self) -> Status<Socket> {
        let (inner, peer) = loop {
            match self.inner.accept() {
                Ok(accepted) => break accepted,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => return Status::from_error(error),
            }
        };

        if let Err(error) = inner.set_nonblocking(true) {
            return Status::Error(error);
        }

        let peer = match peer.as_socket() {
            Some(peer) => peer,
            None => {
                return Status::Error(io::Error::new(
                    ErrorKind::InvalidData,
                    "accepted a connection from a non-IP address",
                ))
            }
        };

        Status::Done(Socket {
            inner,
            is_bound: false,
            remote_host: peer.ip().to_string(),
            remote_port: peer.port(),
        })
    }

    /// Send as much of `data` as the socket accepts right now
    pub fn send(&mut self, data: &[u8]) -> Status<usize> {
        loop {
            match self.inner.send(data) {
                Ok(sent) => return Status::Done(sent),
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => return Status::from_error(error),
            }
        }
    }

    /// Read what is available into `buffer`. `Done(0)` means the peer closed
    /// its side of the connection.
    pub fn receive(&mut self, buffer: &mut [u8]) -> Status<usize> {
        loop {
            match self.inner.read(buffer) {
                Ok(received) => return Status::Done(received),
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => return Status::from_error(error),
            }
        }
    }

    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn local_port(&self) -> Option<u16> {
        self.inner
            .local_addr()
            .ok()
            .and_then(|address| address.as_socket())
            .map(|address| address.port())
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("fd", &self.as_raw_fd())
            .field("is_bound", &self.is_bound)
            .field("remote_host", &self.remote_host)
            .field("remote_port", &self.remote_port)
            .finish()
    }
}
