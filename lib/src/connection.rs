//! One client to upstream pairing and its state machine
//!
//! A connection walks through its states exactly once:
//!
//! ```plain
//! ReceivingRequest -> ConnectingToServer -> SendingRequest
//!     -> ReceivingResponse -> SendingResponse -> Closing
//! ```
//!
//! with a shortcut to `Closing` from any state on error, or after an error
//! answer was sent to the client. Each state has a dedicated handler. When a
//! handler advances the state, the next handler runs immediately instead
//! of waiting for a readiness event; when it returns the same state, the
//! connection is suspended until one of its sockets is reported ready.
//!
//! The single `buffer` accumulates the request while receiving it, is sent
//! upstream, then is cleared and reused to accumulate the response that is
//! finally sent back to the client. `io_offset` tracks how much of it has
//! been sent while draining.

use std::fmt;

use ferry_command_lib::config::ProxyConfig;

use crate::{
    protocol::{is_message_complete, parse, DefaultAnswer},
    ready::Ready,
    resolver::IpAddress,
    selector::Selector,
    server::Callback,
    socket::{Socket, Status},
};

/// Helps tracking a connection in the logs
macro_rules! log_context {
    ($self:expr) => {
        format!(
            "FERRY\t{}\tConnection(state={:?}, target={})\t >>>",
            $self.key,
            $self.state,
            if $self.target_host.is_empty() {
                "<none>"
            } else {
                $self.target_host.as_str()
            },
        )
    };
}

/// A request is not looked at before it is at least this long
const MIN_REQUEST_SIZE: usize = 4;

/// Identifies a connection by its client's address and port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub address: String,
    pub port: u16,
}

impl ConnectionKey {
    pub fn new<S: Into<String>>(address: S, port: u16) -> Self {
        ConnectionKey {
            address: address.into(),
            port,
        }
    }
}

impl From<&Socket> for ConnectionKey {
    fn from(socket: &Socket) -> Self {
        ConnectionKey::new(socket.remote_host(), socket.remote_port())
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    ReceivingRequest,
    ConnectingToServer,
    SendingRequest,
    ReceivingResponse,
    SendingResponse,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionResult {
    /// waiting for the next readiness event
    Continue,
    /// the connection reached `Closing`, its sockets must be released
    Close,
}

pub struct Connection {
    key: ConnectionKey,
    state: ConnectionState,
    request_socket: Socket,
    response_socket: Option<Socket>,
    target_host: String,
    io_offset: usize,
    buffer: Vec<u8>,
    connect_initiated: bool,
}

impl Connection {
    pub fn new(request_socket: Socket) -> Self {
        Connection {
            key: ConnectionKey::from(&request_socket),
            state: ConnectionState::ReceivingRequest,
            request_socket,
            response_socket: None,
            target_host: String::new(),
            io_offset: 0,
            buffer: Vec::new(),
            connect_initiated: false,
        }
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn target_host(&self) -> &str {
        &self.target_host
    }

    pub fn request_socket(&self) -> &Socket {
        &self.request_socket
    }

    pub fn response_socket(&self) -> Option<&Socket> {
        self.response_socket.as_ref()
    }

    /// Run handlers from the current state until one of them suspends
    /// the connection or it reaches `Closing`.
    pub fn ready(&mut self, selector: &mut Selector<Callback>, config: &ProxyConfig) -> SessionResult {
        loop {
            if self.state == ConnectionState::Closing {
                return SessionResult::Close;
            }

            let next = self.handle(selector, config);
            if next == self.state {
                return SessionResult::Continue;
            }

            debug_assert!(
                next > self.state,
                "a connection never goes back from {:?} to {:?}",
                self.state,
                next
            );
            trace!("{} ============== {:?} -> {:?}", log_context!(self), self.state, next);
            self.state = next;
        }
    }

    /// Invoke the handler bound to the current state, returning the next state
    fn handle(&mut self, selector: &mut Selector<Callback>, config: &ProxyConfig) -> ConnectionState {
        match self.state {
            ConnectionState::ReceivingRequest => self.receiving_request(config),
            ConnectionState::ConnectingToServer => self.connecting_to_server(selector, config),
            ConnectionState::SendingRequest => self.sending_request(selector),
            ConnectionState::ReceivingResponse => self.receiving_response(selector, config),
            ConnectionState::SendingResponse => self.sending_response(),
            ConnectionState::Closing => ConnectionState::Closing,
        }
    }

    fn receiving_request(&mut self, config: &ProxyConfig) -> ConnectionState {
        loop {
            let filled = self.buffer.len();
            self.buffer.resize(filled + config.receive_chunk_size, 0);
            let status = self.request_socket.receive(&mut self.buffer[filled..]);

            match status {
                Status::Done(0) => {
                    self.buffer.truncate(filled);
                    debug!("{} client closed the connection", log_context!(self));
                    return ConnectionState::Closing;
                }
                Status::Done(size) => {
                    self.buffer.truncate(filled + size);
                    debug!("{} read {} bytes", log_context!(self), size);
                }
                Status::NotReady => {
                    self.buffer.truncate(filled);
                    return ConnectionState::ReceivingRequest;
                }
                Status::Error(error) => {
                    self.buffer.truncate(filled);
                    error!("{} error reading from client: {}", log_context!(self), error);
                    return ConnectionState::Closing;
                }
            }

            if self.buffer.len() > config.max_request_size {
                warn!(
                    "{} request is larger than {} bytes",
                    log_context!(self),
                    config.max_request_size
                );
                self.send_answer(DefaultAnswer::Answer500);
                return ConnectionState::Closing;
            }

            let header = parse(&self.buffer);
            if !self.target_host.is_empty()
                || self.buffer.len() < MIN_REQUEST_SIZE
                || !is_message_complete(&self.buffer)
            {
                continue;
            }

            if header.is_routable() {
                self.target_host = header.uri;
                info!(
                    "accepted request from {} for http://{}",
                    self.key, self.target_host
                );
                match Socket::new() {
                    Ok(socket) => self.response_socket = Some(socket),
                    Err(error) => {
                        error!("{} could not create upstream socket: {}", log_context!(self), error);
                        return ConnectionState::Closing;
                    }
                }
                return ConnectionState::ConnectingToServer;
            }

            if !header.is_valid() {
                debug!("{} invalid request line", log_context!(self));
                self.send_answer(DefaultAnswer::Answer400);
                return ConnectionState::Closing;
            }

            debug!(
                "{} unsupported request: {} {}",
                log_context!(self),
                header.method,
                header.version
            );
            self.send_answer(DefaultAnswer::Answer405);
            return ConnectionState::Closing;
        }
    }

    fn connecting_to_server(
        &mut self,
        selector: &mut Selector<Callback>,
        config: &ProxyConfig,
    ) -> ConnectionState {
        let socket = match self.response_socket.as_mut() {
            Some(socket) => socket,
            None => {
                error!("{} no upstream socket to connect", log_context!(self));
                return ConnectionState::Closing;
            }
        };

        let status = if self.connect_initiated {
            socket.is_connected()
        } else {
            self.connect_initiated = true;
            let target = match IpAddress::new(&self.target_host, config.upstream_port) {
                Ok(target) => target,
                Err(error) => {
                    error!("{} {}", log_context!(self), error);
                    return ConnectionState::Closing;
                }
            };
            debug!("{} connecting to {}", log_context!(self), target);

            let status = socket.connect(&target);
            if !status.is_error() {
                if let Err(error) =
                    selector.register(&*socket, Ready::WRITABLE, Callback::Connection(self.key.clone()))
                {
                    error!("{} {}", log_context!(self), error);
                    return ConnectionState::Closing;
                }
            }
            status
        };

        match status {
            Status::Done(()) => ConnectionState::SendingRequest,
            Status::NotReady => ConnectionState::ConnectingToServer,
            Status::Error(error) => {
                error!(
                    "{} could not connect to upstream: {}",
                    log_context!(self),
                    error
                );
                ConnectionState::Closing
            }
        }
    }

    fn sending_request(&mut self, selector: &mut Selector<Callback>) -> ConnectionState {
        let socket = match self.response_socket.as_mut() {
            Some(socket) => socket,
            None => {
                error!("{} no upstream socket to send to", log_context!(self));
                return ConnectionState::Closing;
            }
        };

        while self.io_offset < self.buffer.len() {
            match socket.send(&self.buffer[self.io_offset..]) {
                Status::Done(sent) => {
                    debug!("{} wrote {} bytes upstream", log_context!(self), sent);
                    self.io_offset += sent;
                }
                Status::NotReady => return ConnectionState::SendingRequest,
                Status::Error(error) => {
                    error!("{} error writing to upstream: {}", log_context!(self), error);
                    return ConnectionState::Closing;
                }
            }
        }

        if let Err(error) = selector.change_interest(&*socket, Ready::READABLE) {
            error!("{} {}", log_context!(self), error);
            return ConnectionState::Closing;
        }

        self.buffer.clear();
        self.io_offset = 0;
        ConnectionState::ReceivingResponse
    }

    fn receiving_response(
        &mut self,
        selector: &mut Selector<Callback>,
        config: &ProxyConfig,
    ) -> ConnectionState {
        let socket = match self.response_socket.as_mut() {
            Some(socket) => socket,
            None => {
                error!("{} no upstream socket to read from", log_context!(self));
                return ConnectionState::Closing;
            }
        };

        loop {
            let filled = self.buffer.len();
            self.buffer.resize(filled + config.receive_chunk_size, 0);
            let status = socket.receive(&mut self.buffer[filled..]);

            match status {
                Status::Done(0) => {
                    self.buffer.truncate(filled);
                    if self.buffer.is_empty() {
                        debug!("{} upstream closed without answering", log_context!(self));
                        return ConnectionState::Closing;
                    }
                    // the upstream delimited its response by closing
                    break;
                }
                Status::Done(size) => {
                    self.buffer.truncate(filled + size);
                    debug!("{} read {} bytes from upstream", log_context!(self), size);
                    if is_message_complete(&self.buffer) {
                        break;
                    }
                }
                Status::NotReady => {
                    self.buffer.truncate(filled);
                    return ConnectionState::ReceivingResponse;
                }
                Status::Error(error) => {
                    self.buffer.truncate(filled);
                    error!("{} error reading from upstream: {}", log_context!(self), error);
                    return ConnectionState::Closing;
                }
            }
        }

        // the upstream has nothing more to give
        self.release_response_socket(selector);
        if let Err(error) = selector.change_interest(&self.request_socket, Ready::WRITABLE) {
            error!("{} {}", log_context!(self), error);
            return ConnectionState::Closing;
        }
        ConnectionState::SendingResponse
    }

    fn sending_response(&mut self) -> ConnectionState {
        while self.io_offset < self.buffer.len() {
            match self.request_socket.send(&self.buffer[self.io_offset..]) {
                Status::Done(sent) => {
                    debug!("{} wrote {} bytes to client", log_context!(self), sent);
                    self.io_offset += sent;
                }
                Status::NotReady => return ConnectionState::SendingResponse,
                Status::Error(error) => {
                    error!("{} error writing to client: {}", log_context!(self), error);
                    return ConnectionState::Closing;
                }
            }
        }
        ConnectionState::Closing
    }

    /// Best effort: a single send, never retried
    fn send_answer(&mut self, answer: DefaultAnswer) {
        let bytes = answer.as_bytes();
        match self.request_socket.send(bytes) {
            Status::Done(sent) if sent == bytes.len() => {
                debug!("{} sent {} answer", log_context!(self), u16::from(answer));
            }
            Status::Done(sent) => warn!(
                "{} {} answer truncated, sent {} of {} bytes",
                log_context!(self),
                u16::from(answer),
                sent,
                bytes.len()
            ),
            Status::NotReady => warn!(
                "{} client not ready, {} answer dropped",
                log_context!(self),
                u16::from(answer)
            ),
            Status::Error(error) => error!(
                "{} could not send {} answer: {}",
                log_context!(self),
                u16::from(answer),
                error
            ),
        }
    }

    fn release_response_socket(&mut self, selector: &mut Selector<Callback>) {
        if let Some(socket) = self.response_socket.take() {
            if selector.is_registered(&socket) {
                if let Err(error) = selector.unregister(&socket) {
                    error!("{} {}", log_context!(self), error);
                }
            }
        }
    }

    /// Unregister every socket still owned. The client socket is released
    /// when the connection is dropped.
    pub fn close(&mut self, selector: &mut Selector<Callback>) {
        self.release_response_socket(selector);
        if selector.is_registered(&self.request_socket) {
            if let Err(error) = selector.unregister(&self.request_socket) {
                error!("{} {}", log_context!(self), error);
            }
        }
        self.state = ConnectionState::Closing;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("target_host", &self.target_host)
            .field("io_offset", &self.io_offset)
            .field("buffered", &self.buffer.len())
            .field("connect_initiated", &self.connect_initiated)
            .finish()
    }
}
