use clap::Parser;

use ferry_command_lib::config::DEFAULT_LISTEN_PORT;

#[derive(Parser, PartialEq, Eq, Clone, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// port the proxy listens on
    #[arg(default_value_t = DEFAULT_LISTEN_PORT)]
    pub port: u16,
    /// one of error, warn, info, debug, trace or off
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    pub log_level: String,
    /// stdout, stderr, file:///path/to/file or tcp://host:port
    #[arg(short = 't', long = "log-target", default_value = "stdout")]
    pub log_target: String,
}

pub fn args() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["ferry"]).unwrap();
        assert_eq!(args.port, 5555);
        assert_eq!(args.log_level, "info");
        assert_eq!(args.log_target, "stdout");
    }

    #[test]
    fn explicit_port_and_logging() {
        let args = Args::try_parse_from([
            "ferry",
            "8080",
            "--log-level",
            "debug",
            "--log-target",
            "stderr",
        ])
        .unwrap();
        assert_eq!(args.port, 8080);
        assert_eq!(args.log_level, "debug");
        assert_eq!(args.log_target, "stderr");
    }

    #[test]
    fn port_must_fit_in_u16() {
        assert!(Args::try_parse_from(["ferry", "70000"]).is_err());
        assert!(Args::try_parse_from(["ferry", "http"]).is_err());
    }
}
