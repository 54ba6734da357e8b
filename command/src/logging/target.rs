use std::{
    fmt,
    fs::OpenOptions,
    io::{self, Write},
    net::{SocketAddr, TcpStream},
    str::FromStr,
};

use crate::logging::LogError;

/// Where log lines are written
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum LogTarget {
    #[default]
    Stdout,
    Stderr,
    File(String),
    Tcp(SocketAddr),
}

impl FromStr for LogTarget {
    type Err = LogError;

    /// accepted forms: `stdout`, `stderr`, `file:///var/log/ferry.log`, `tcp://127.0.0.1:9000`
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "stdout" => return Ok(LogTarget::Stdout),
            "stderr" => return Ok(LogTarget::Stderr),
            _ => {}
        }

        if let Some(path) = value.strip_prefix("file://") {
            if path.is_empty() {
                return Err(LogError::InvalidLogTarget(
                    value.to_owned(),
                    "missing file path",
                ));
            }
            return Ok(LogTarget::File(path.to_owned()));
        }

        if let Some(address) = value.strip_prefix("tcp://") {
            return address
                .parse::<SocketAddr>()
                .map(LogTarget::Tcp)
                .map_err(|error| LogError::InvalidSocketAddress(value.to_owned(), error));
        }

        Err(LogError::InvalidLogTarget(
            value.to_owned(),
            "expected stdout, stderr, file:// or tcp://",
        ))
    }
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogTarget::Stdout => write!(f, "stdout"),
            LogTarget::Stderr => write!(f, "stderr"),
            LogTarget::File(path) => write!(f, "file://{path}"),
            LogTarget::Tcp(address) => write!(f, "tcp://{address}"),
        }
    }
}

impl LogTarget {
    /// open the underlying sink
    pub fn open(&self) -> Result<Box<dyn Write + Send>, LogError> {
        Ok(match self {
            LogTarget::Stdout => Box::new(io::stdout()),
            LogTarget::Stderr => Box::new(io::stderr()),
            LogTarget::File(path) => Box::new(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|error| LogError::OpenFile(path.to_owned(), error))?,
            ),
            LogTarget::Tcp(address) => Box::new(
                TcpStream::connect(address)
                    .map_err(|error| LogError::TcpConnect(address.to_string(), error))?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_targets() {
        assert_eq!("stdout".parse::<LogTarget>().unwrap(), LogTarget::Stdout);
        assert_eq!("stderr".parse::<LogTarget>().unwrap(), LogTarget::Stderr);
        assert_eq!(
            "file:///tmp/ferry.log".parse::<LogTarget>().unwrap(),
            LogTarget::File("/tmp/ferry.log".to_owned())
        );
        assert_eq!(
            "tcp://127.0.0.1:9000".parse::<LogTarget>().unwrap(),
            LogTarget::Tcp("127.0.0.1:9000".parse().unwrap())
        );
    }

    #[test]
    fn reject_unknown_targets() {
        assert!(matches!(
            "syslog".parse::<LogTarget>(),
            Err(LogError::InvalidLogTarget(..))
        ));
        assert!(matches!(
            "file://".parse::<LogTarget>(),
            Err(LogError::InvalidLogTarget(..))
        ));
        assert!(matches!(
            "tcp://localhost".parse::<LogTarget>(),
            Err(LogError::InvalidSocketAddress(..))
        ));
    }

    #[test]
    fn display_round_trips_through_parse() {
        let target = LogTarget::File("/var/log/ferry.log".to_owned());
        assert_eq!(target.to_string().parse::<LogTarget>().unwrap(), target);
    }
}
