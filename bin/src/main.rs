//! ferry: a non-blocking HTTP/1.0 forwarding proxy
//!
//! `ferry [PORT]` listens on PORT (5555 by default) and forwards
//! `GET http://<host>/ HTTP/1.0` requests to port 80 of the named host.

#[macro_use]
extern crate log;

mod cli;

use std::process;

use ferry_command_lib::{
    config::{ConfigError, ProxyConfig},
    logging::{setup_logging, LogError, LogTarget},
};
use ferry_lib::server::{Proxy, ProxyError};

#[derive(thiserror::Error, Debug)]
enum MainError {
    #[error("could not set up logging: {0}")]
    Logging(#[from] LogError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("proxy failure: {0}")]
    Proxy(#[from] ProxyError),
}

fn main() {
    if let Err(main_error) = main_process() {
        eprintln!("{main_error}");
        error!("{}", main_error);
        process::exit(1);
    }
    info!("ferry stopped");
}

fn main_process() -> Result<(), MainError> {
    let args = cli::args();

    let target: LogTarget = args.log_target.parse()?;
    setup_logging("MAIN", &args.log_level, &target)?;
    info!("starting ferry {}", env!("CARGO_PKG_VERSION"));

    let config = ProxyConfig::builder(args.port).build()?;
    let mut proxy = Proxy::new(config)?;
    proxy.run()?;
    Ok(())
}
