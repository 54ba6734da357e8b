use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    time::Duration,
};

use crate::BUFFER_SIZE;

/// A blocking client sending one request per connection
pub struct Client {
    pub name: String,
    pub address: SocketAddr,
    pub request: Vec<u8>,
    stream: Option<TcpStream>,
    pub requests_sent: usize,
    pub responses_received: usize,
}

impl Client {
    pub fn new<S: Into<String>, R: Into<Vec<u8>>>(name: S, address: SocketAddr, request: R) -> Self {
        Self {
            name: name.into(),
            address,
            request: request.into(),
            stream: None,
            requests_sent: 0,
            responses_received: 0,
        }
    }

    pub fn connect(&mut self) {
        let stream = TcpStream::connect(self.address).expect("could not connect to the proxy");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("could not set read timeout");
        self.stream = Some(stream);
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn send(&mut self) -> Option<usize> {
        let stream = self.stream.as_mut()?;
        match stream.write_all(&self.request) {
            Ok(()) => {
                self.requests_sent += 1;
                Some(self.request.len())
            }
            Err(error) => {
                warn!("{}: could not send request: {}", self.name, error);
                None
            }
        }
    }

    /// Read until the proxy closes the connection.
    /// Returns `None` if it closed without sending anything.
    pub fn receive(&mut self) -> Option<String> {
        let mut stream = self.stream.take()?;
        let mut response = Vec::new();
        let mut buffer = [0u8; BUFFER_SIZE];
        loop {
            match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(size) => response.extend_from_slice(&buffer[..size]),
                Err(error) => {
                    warn!("{}: read error: {}", self.name, error);
                    break;
                }
            }
        }

        if response.is_empty() {
            return None;
        }
        self.responses_received += 1;
        Some(String::from_utf8_lossy(&response).into_owned())
    }
}
