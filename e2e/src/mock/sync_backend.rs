use std::{
    io::{ErrorKind, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::mpsc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    mock::aggregator::{Aggregator, SimpleAggregator},
    BUFFER_SIZE,
};

/// Handle to a thread where a mock upstream runs
///
/// The upstream answers each connection once: it reads a request up to the
/// blank line, writes its canned response and closes the connection.
pub struct Backend<A = SimpleAggregator> {
    pub name: String,
    pub address: SocketAddr,
    /// Allows to stop the backend within the thread
    stop_tx: mpsc::Sender<()>,
    /// Receives the aggregator once the thread ends
    aggregator_rx: mpsc::Receiver<A>,
    thread: Option<JoinHandle<()>>,
}

impl<A: Aggregator + Send + 'static> Backend<A> {
    pub fn spawn<S: Into<String>, R: Into<Vec<u8>>>(name: S, response: R, aggregator: A) -> Self {
        let name = name.into();
        let response = response.into();
        let listener = TcpListener::bind("127.0.0.1:0").expect("could not bind mock backend");
        let address = listener
            .local_addr()
            .expect("could not get the mock backend address");
        listener
            .set_nonblocking(true)
            .expect("could not set nonblocking on listener");

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (aggregator_tx, aggregator_rx) = mpsc::channel::<A>();
        let thread_name = name.to_owned();

        // The backend runs on this thread:
        // - accepts tcp connections, one at a time
        // - answers each of them with `response`
        // - monitors stop_rx to stop itself
        let thread = thread::spawn(move || {
            let mut aggregator = aggregator;
            loop {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        debug!("{}: new connection from {}", thread_name, peer);
                        serve(stream, &thread_name, &response, &mut aggregator);
                    }
                    Err(error) if error.kind() == ErrorKind::WouldBlock => {
                        match stop_rx.try_recv() {
                            Err(mpsc::TryRecvError::Empty) => {
                                thread::sleep(Duration::from_millis(1))
                            }
                            _ => break,
                        }
                    }
                    Err(error) => warn!("{}: accept error: {}", thread_name, error),
                }
            }
            drop(listener);
            let _ = aggregator_tx.send(aggregator);
        });

        info!("{} listening on {}", name, address);
        Self {
            name,
            address,
            stop_tx,
            aggregator_rx,
            thread: Some(thread),
        }
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub fn stop_and_get_aggregator(&mut self) -> Option<A> {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.aggregator_rx.recv().ok()
    }
}

fn serve<A: Aggregator>(mut stream: TcpStream, name: &str, response: &[u8], aggregator: &mut A) {
    stream
        .set_nonblocking(false)
        .expect("could not set blocking on backend stream");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("could not set read timeout");

    let mut request = Vec::new();
    let mut buffer = [0u8; BUFFER_SIZE];
    while !request.ends_with(b"\r\n\r\n") {
        match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(size) => request.extend_from_slice(&buffer[..size]),
            Err(error) => {
                warn!("{}: read error: {}", name, error);
                break;
            }
        }
    }
    if request.is_empty() {
        return;
    }
    aggregator.record_request(&request);

    match stream.write_all(response) {
        Ok(()) => aggregator.record_response(),
        Err(error) => warn!("{}: write error: {}", name, error),
    }
}
