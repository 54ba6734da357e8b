use std::{
    net::SocketAddr,
    thread::{self, JoinHandle},
};

use ferry_command_lib::config::ProxyConfig;
use ferry_lib::server::{Proxy, ProxyError, StopHandle};

/// A proxy running its event loop on a dedicated thread
pub struct Worker {
    pub name: String,
    pub address: SocketAddr,
    stop_handle: StopHandle,
    thread: Option<JoinHandle<Result<(), ProxyError>>>,
}

impl Worker {
    pub fn start_new_worker<S: Into<String>>(name: S, config: ProxyConfig) -> Self {
        let name = name.into();
        let mut proxy = Proxy::new(config).expect("could not create the proxy");
        let port = proxy
            .local_port()
            .expect("the proxy is not listening");
        let stop_handle = proxy.stop_handle();

        let thread_name = name.to_owned();
        let thread = thread::spawn(move || {
            info!("{} running", thread_name);
            let result = proxy.run();
            info!("{} stopped with {} connections", thread_name, proxy.connection_count());
            result
        });

        Self {
            name,
            address: SocketAddr::from(([127, 0, 0, 1], port)),
            stop_handle,
            thread: Some(thread),
        }
    }

    /// A configuration on an ephemeral port, forwarding to `upstream_port`
    pub fn config(upstream_port: u16) -> ProxyConfig {
        ProxyConfig::builder(0)
            .with_upstream_port(upstream_port)
            .build()
            .expect("invalid proxy configuration")
    }

    pub fn soft_stop(&mut self) {
        self.stop_handle.stop();
    }

    /// Returns true if the event loop ended without error
    pub fn wait_for_server_stop(&mut self) -> bool {
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(Ok(()))) => true,
            Some(Ok(Err(error))) => {
                error!("{} failed: {}", self.name, error);
                false
            }
            Some(Err(_)) => {
                error!("{} panicked", self.name);
                false
            }
            None => false,
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.soft_stop();
            self.wait_for_server_stop();
        }
    }
}
