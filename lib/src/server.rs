//! The proxy: a listening socket, the table of live connections, and the
//! event loop dispatching readiness to them.

use std::{
    collections::HashMap,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use mio::Waker;

use ferry_command_lib::config::ProxyConfig;

use crate::{
    connection::{Connection, ConnectionKey, SessionResult},
    ready::Ready,
    selector::{Dispatch, Selector, SelectorError},
    socket::{Socket, Status},
};

/// What a registered socket stands for, handed back on readiness
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Listener,
    /// either socket of the connection stored under this key
    Connection(ConnectionKey),
}

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("could not create the listening socket: {0}")]
    Socket(io::Error),
    #[error("could not listen on port {port}: {error}")]
    Listen { port: u16, error: io::Error },
    #[error("selector error: {0}")]
    Selector(#[from] SelectorError),
}

/// Owns everything the callbacks act upon
pub struct Engine {
    listener: Option<Socket>,
    connections: HashMap<ConnectionKey, Connection>,
    config: ProxyConfig,
}

impl Engine {
    fn accept(&mut self, selector: &mut Selector<Callback>) {
        let listener = match self.listener.as_ref() {
            Some(listener) => listener,
            None => return,
        };

        loop {
            let socket = match listener.accept() {
                Status::Done(socket) => socket,
                Status::NotReady => break,
                Status::Error(error) => {
                    error!("could not accept a connection: {}", error);
                    break;
                }
            };

            let connection = Connection::new(socket);
            let key = connection.key().clone();
            if self.connections.contains_key(&key) {
                error!("a connection from {} is already open, dropping the new one", key);
                continue;
            }

            if let Err(error) = selector.register(
                connection.request_socket(),
                Ready::READABLE,
                Callback::Connection(key.clone()),
            ) {
                error!("could not register the connection from {}: {}", key, error);
                continue;
            }

            debug!("new connection from {}", key);
            self.connections.insert(key, connection);
        }
    }

    fn close_listener(&mut self, selector: &mut Selector<Callback>) {
        if let Some(listener) = self.listener.take() {
            if let Err(error) = selector.unregister(&listener) {
                error!("could not unregister the listener: {}", error);
            }
            info!("listener closed");
        }
    }
}

impl Dispatch<Callback> for Engine {
    fn dispatch(&mut self, selector: &mut Selector<Callback>, callback: Callback, ready: Ready) {
        match callback {
            Callback::Listener => {
                if ready.is_error() || ready.is_hup() {
                    error!("listener reported {}", ready);
                    self.close_listener(selector);
                    return;
                }
                self.accept(selector);
            }
            Callback::Connection(key) => {
                let connection = match self.connections.get_mut(&key) {
                    Some(connection) => connection,
                    None => {
                        warn!("readiness {} for unknown connection {}", ready, key);
                        return;
                    }
                };

                trace!("connection {} is ready: {}", key, ready);
                if connection.ready(selector, &self.config) == SessionResult::Close {
                    connection.close(selector);
                    self.connections.remove(&key);
                    debug!("connection {} closed, {} left", key, self.connections.len());
                }
            }
        }
    }
}

/// Stops a running [`Proxy`] from any thread
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(error) = self.waker.wake() {
            error!("could not wake the event loop: {}", error);
        }
    }
}

pub struct Proxy {
    selector: Selector<Callback>,
    engine: Engine,
    running: Arc<AtomicBool>,
}

impl Proxy {
    /// Listen on the configured port. Connections are only accepted once
    /// the event loop runs.
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let mut selector = Selector::new(config.events_capacity)?;

        let mut listener = Socket::new().map_err(ProxyError::Socket)?;
        if let Status::Error(error) = listener.listen(config.port) {
            return Err(ProxyError::Listen {
                port: config.port,
                error,
            });
        }
        selector.register(&listener, Ready::READABLE, Callback::Listener)?;

        info!(
            "listening on port {}, forwarding to upstream port {}",
            listener.local_port().unwrap_or(config.port),
            config.upstream_port
        );

        Ok(Proxy {
            selector,
            engine: Engine {
                listener: Some(listener),
                connections: HashMap::new(),
                config,
            },
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Loop until a [`StopHandle`] asks to stop
    pub fn run(&mut self) -> Result<(), ProxyError> {
        while self.running.load(Ordering::SeqCst) {
            self.run_once(None)?;
        }
        info!(
            "event loop stopped with {} open connections",
            self.engine.connections.len()
        );
        Ok(())
    }

    /// One reactor pass, returns the number of dispatched callbacks
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<usize, ProxyError> {
        Ok(self.selector.run_once(timeout, &mut self.engine)?)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
            waker: self.selector.waker(),
        }
    }

    /// The port actually listened on, `None` once the listener is closed
    pub fn local_port(&self) -> Option<u16> {
        self.engine.listener.as_ref()?.local_port()
    }

    pub fn is_listening(&self) -> bool {
        self.engine.listener.is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.engine.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::{TcpListener, TcpStream},
        thread,
        time::Instant,
    };

    use super::*;

    fn proxy(upstream_port: u16) -> Proxy {
        let config = ProxyConfig::builder(0)
            .with_upstream_port(upstream_port)
            .build()
            .unwrap();
        Proxy::new(config).unwrap()
    }

    /// run passes until `done` holds
    fn run_until(proxy: &mut Proxy, mut done: impl FnMut(&Proxy) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(proxy) {
            assert!(Instant::now() < deadline, "timed out");
            proxy.run_once(Some(Duration::from_millis(50))).unwrap();
        }
    }

    fn client(proxy: &Proxy) -> TcpStream {
        let client = TcpStream::connect(("127.0.0.1", proxy.local_port().unwrap())).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client
    }

    #[test]
    fn listens_on_an_ephemeral_port() {
        let proxy = proxy(80);
        assert!(proxy.is_listening());
        assert_ne!(proxy.local_port(), Some(0));
        assert_eq!(proxy.connection_count(), 0);
    }

    #[test]
    fn port_already_in_use() {
        let first = proxy(80);
        let config = ProxyConfig::builder(first.local_port().unwrap())
            .build()
            .unwrap();
        assert!(matches!(
            Proxy::new(config),
            Err(ProxyError::Listen { .. })
        ));
    }

    #[test]
    fn accepts_and_tracks_connections() {
        let mut proxy = proxy(80);
        let _first = client(&proxy);
        let _second = client(&proxy);

        run_until(&mut proxy, |proxy| proxy.connection_count() == 2);
    }

    #[test]
    fn closed_connections_leave_the_table() {
        let mut proxy = proxy(80);
        let mut client = client(&proxy);
        run_until(&mut proxy, |proxy| proxy.connection_count() == 1);

        client.write_all(b"BREW http://pot HTTP/1.0\r\n\r\n").unwrap();
        run_until(&mut proxy, |proxy| proxy.connection_count() == 0);

        let mut answer = Vec::new();
        client.read_to_end(&mut answer).unwrap();
        assert_eq!(answer, b"HTTP/1.0 400 OK");
    }

    #[test]
    fn relays_an_upstream_response() {
        let upstream = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut proxy = proxy(upstream.local_addr().unwrap().port());

        let server = thread::spawn(move || {
            let (mut stream, _) = upstream.accept().unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 256];
            while !request.ends_with(b"\r\n\r\n") {
                let size = stream.read(&mut chunk).unwrap();
                assert!(size > 0);
                request.extend_from_slice(&chunk[..size]);
            }
            stream
                .write_all(b"HTTP/1.0 200 OK\r\n\r\n<html>pong</html>")
                .unwrap();
            let _ = stream.read(&mut chunk);
            request
        });

        let mut client = client(&proxy);
        client
            .write_all(b"GET http://localhost/ HTTP/1.0\r\n\r\n")
            .unwrap();
        run_until(&mut proxy, |proxy| proxy.connection_count() == 1);
        run_until(&mut proxy, |proxy| proxy.connection_count() == 0);

        let mut answer = Vec::new();
        client.read_to_end(&mut answer).unwrap();
        assert_eq!(answer, b"HTTP/1.0 200 OK\r\n\r\n<html>pong</html>");
        assert_eq!(
            server.join().unwrap(),
            b"GET http://localhost/ HTTP/1.0\r\n\r\n"
        );
        assert!(proxy.is_listening());
    }

    #[test]
    fn listener_hang_up_keeps_live_connections() {
        for failure in [Ready::HUP, Ready::ERROR, Ready::READABLE | Ready::HUP] {
            let mut proxy = proxy(80);
            let mut client = client(&proxy);
            run_until(&mut proxy, |proxy| proxy.connection_count() == 1);

            proxy
                .engine
                .dispatch(&mut proxy.selector, Callback::Listener, failure);

            assert!(!proxy.is_listening());
            assert_eq!(proxy.local_port(), None);
            // only the client socket is left
            assert_eq!(proxy.selector.len(), 1);
            assert!(proxy.run_once(Some(Duration::from_millis(10))).is_ok());

            client.write_all(b"POST http://x HTTP/1.0\r\n\r\n").unwrap();
            run_until(&mut proxy, |proxy| proxy.connection_count() == 0);
            assert!(proxy.selector.is_empty());

            let mut answer = Vec::new();
            client.read_to_end(&mut answer).unwrap();
            assert_eq!(answer, b"HTTP/1.0 405 OK");
        }
    }

    #[test]
    fn closing_the_listener_twice_is_harmless() {
        let mut proxy = proxy(80);
        proxy
            .engine
            .dispatch(&mut proxy.selector, Callback::Listener, Ready::HUP);
        proxy
            .engine
            .dispatch(&mut proxy.selector, Callback::Listener, Ready::READABLE);
        proxy
            .engine
            .dispatch(&mut proxy.selector, Callback::Listener, Ready::ERROR);

        assert!(!proxy.is_listening());
        assert!(proxy.selector.is_empty());
        assert_eq!(proxy.run_once(Some(Duration::from_millis(10))).unwrap(), 0);
    }

    #[test]
    fn stop_handle_ends_the_loop() {
        let mut proxy = proxy(80);
        let stop = proxy.stop_handle();

        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stop.stop();
        });

        proxy.run().unwrap();
        stopper.join().unwrap();
    }
}
