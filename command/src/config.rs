//! Proxy configuration
//!
//! ferry reads no configuration file and no environment variable: the
//! listening port is the only external parameter. The remaining fields
//! carry the engine's fixed limits, kept here so they are documented
//! in one place and can be lowered in tests.
//!
//! ```
//! use ferry_command_lib::config::ProxyConfig;
//!
//! let config = ProxyConfig::builder(5555)
//!     .with_max_request_size(4096)
//!     .build()
//!     .expect("valid configuration");
//! assert_eq!(config.upstream_port, 80);
//! ```

/// port the proxy listens on when none is given
pub const DEFAULT_LISTEN_PORT: u16 = 5555;

/// upstream servers are always reached on this port
pub const DEFAULT_UPSTREAM_PORT: u16 = 80;

/// a request growing past this size is answered with a 500
pub const MAX_REQUEST_SIZE: usize = 2048;

/// size of a single non-blocking read
pub const DEFAULT_RECEIVE_CHUNK_SIZE: usize = 1024;

/// number of readiness events fetched in one reactor pass
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value} (must be greater than zero)")]
    ZeroValue { field: &'static str, value: usize },
    #[error("receive chunk size {chunk} is larger than the maximum request size {max}")]
    ChunkLargerThanRequest { chunk: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub port: u16,
    pub upstream_port: u16,
    pub max_request_size: usize,
    pub receive_chunk_size: usize,
    pub events_capacity: usize,
}

impl ProxyConfig {
    pub fn builder(port: u16) -> ProxyConfigBuilder {
        ProxyConfigBuilder::new(port)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_LISTEN_PORT,
            upstream_port: DEFAULT_UPSTREAM_PORT,
            max_request_size: MAX_REQUEST_SIZE,
            receive_chunk_size: DEFAULT_RECEIVE_CHUNK_SIZE,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
        }
    }
}

/// Builds a [`ProxyConfig`], checking the limits in `build`
#[derive(Debug, Clone)]
pub struct ProxyConfigBuilder {
    port: u16,
    upstream_port: Option<u16>,
    max_request_size: Option<usize>,
    receive_chunk_size: Option<usize>,
    events_capacity: Option<usize>,
}

impl ProxyConfigBuilder {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            upstream_port: None,
            max_request_size: None,
            receive_chunk_size: None,
            events_capacity: None,
        }
    }

    pub fn with_upstream_port(&mut self, upstream_port: u16) -> &mut Self {
        self.upstream_port = Some(upstream_port);
        self
    }

    pub fn with_max_request_size(&mut self, max_request_size: usize) -> &mut Self {
        self.max_request_size = Some(max_request_size);
        self
    }

    pub fn with_receive_chunk_size(&mut self, receive_chunk_size: usize) -> &mut Self {
        self.receive_chunk_size = Some(receive_chunk_size);
        self
    }

    pub fn with_events_capacity(&mut self, events_capacity: usize) -> &mut Self {
        self.events_capacity = Some(events_capacity);
        self
    }

    pub fn build(&self) -> Result<ProxyConfig, ConfigError> {
        let config = ProxyConfig {
            port: self.port,
            upstream_port: self.upstream_port.unwrap_or(DEFAULT_UPSTREAM_PORT),
            max_request_size: self.max_request_size.unwrap_or(MAX_REQUEST_SIZE),
            receive_chunk_size: self
                .receive_chunk_size
                .unwrap_or(DEFAULT_RECEIVE_CHUNK_SIZE),
            events_capacity: self.events_capacity.unwrap_or(DEFAULT_EVENTS_CAPACITY),
        };

        for (field, value) in [
            ("max_request_size", config.max_request_size),
            ("receive_chunk_size", config.receive_chunk_size),
            ("events_capacity", config.events_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroValue { field, value });
            }
        }

        if config.receive_chunk_size > config.max_request_size {
            return Err(ConfigError::ChunkLargerThanRequest {
                chunk: config.receive_chunk_size,
                max: config.max_request_size,
            });
        }

        Ok(config)
    }
}
