use std::{
    io::Write,
    str::FromStr,
    sync::Mutex,
};

use log::{LevelFilter, Log, Metadata, Record};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::logging::{LogError, LogTarget};

/// Writes one line per record:
///
/// ```plain
/// 2026-10-18T09:12:44.123Z 41022 MAIN INFO	accepted 127.0.0.1:51234 -> example.com
/// ```
pub struct Logger {
    tag: String,
    pid: u32,
    level: LevelFilter,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl Logger {
    pub fn new(tag: &str, level: LevelFilter, sink: Box<dyn Write + Send>) -> Self {
        Logger {
            tag: tag.to_owned(),
            pid: std::process::id(),
            level,
            sink: Mutex::new(sink),
        }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    fn format(&self, record: &Record) -> String {
        let now = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::from("-"));
        format!(
            "{} {} {} {}\t{}\n",
            now,
            self.pid,
            self.tag,
            record.level(),
            record.args()
        )
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = self.format(record);
        // a poisoned lock only means another thread panicked mid-write
        let mut sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = sink.write_all(line.as_bytes());
    }

    fn flush(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.flush();
        }
    }
}

/// parse a level such as `info` or `TRACE`
pub fn parse_level(level: &str) -> Result<LevelFilter, LogError> {
    LevelFilter::from_str(level).map_err(|_| LogError::InvalidLogLevel(level.to_owned()))
}

/// Install the global logger, to be called once at startup
pub fn setup_logging(tag: &str, level: &str, target: &LogTarget) -> Result<(), LogError> {
    let level = parse_level(level)?;
    let logger = Logger::new(tag, level, target.open()?);

    log::set_boxed_logger(Box::new(logger)).map_err(|_| LogError::AlreadyInstalled)?;
    log::set_max_level(level);
    Ok(())
}

/// Install a standard output logger, ignoring a logger installed earlier.
/// Meant for tests, where several cases race to set up logging.
pub fn setup_default_logging(level: &str, tag: &str) {
    let level = parse_level(level).unwrap_or(LevelFilter::Info);
    let logger = Logger::new(tag, level, Box::new(std::io::stdout()));
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(level);
    }
}
