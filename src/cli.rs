//! Command-line interface for session-mux.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Command-line arguments.
///
/// Unset options leave the lower configuration layers in charge.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Host address to bind to.
    pub host: Option<IpAddr>,
    /// Port to listen on.
    pub port: Option<u16>,
    /// Path of the session endpoint.
    pub endpoint: Option<String>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Serve one session over stdin/stdout instead of HTTP.
    pub stdio: bool,
    /// Idle session timeout in seconds.
    pub idle_timeout: Option<u64>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('H') | Long("host") => {
                let value: String = parser.value()?.parse()?;
                result.host = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("host", value))?,
                );
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                result.port = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("port", value))?,
                );
            }
            Short('e') | Long("endpoint") => {
                let value: String = parser.value()?.parse()?;
                if !value.starts_with('/') {
                    return Err(ArgsError::InvalidValue("endpoint", value));
                }
                result.endpoint = Some(value);
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Long("stdio") => {
                result.stdio = true;
            }
            Long("idle-timeout") => {
                let value: String = parser.value()?.parse()?;
                result.idle_timeout = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("idle-timeout", value))?,
                );
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"session-mux {version}
Session-scoped multiplexer for stateful JSON-RPC sessions over HTTP

USAGE:
    session-mux [OPTIONS]

OPTIONS:
    -H, --host <ADDR>         Host address to bind [default: 127.0.0.1]
    -p, --port <PORT>         Port to listen on [default: 5004]
    -e, --endpoint <PATH>     Session endpoint path [default: /mcp]
    -c, --config <FILE>       Path to configuration file (JSON)
    -l, --log-level <LVL>     Log level (error, warn, info, debug, trace)
        --stdio               Serve a single session over stdin/stdout
        --idle-timeout <SECS> Terminate sessions idle this long
    -h, --help                Print help
    -V, --version             Print version

ENVIRONMENT VARIABLES:
    SESSION_MUX_HOST          Host address (overrides config)
    SESSION_MUX_PORT          Port number (overrides config)
    SESSION_MUX_ENDPOINT      Endpoint path (overrides config)
    SESSION_MUX_TRANSPORT     http or stdio (overrides config)
    SESSION_MUX_IDLE_TIMEOUT  Idle timeout in seconds (overrides config)
    SESSION_MUX_LOG_LEVEL     Log level (overrides config)
    RUST_LOG                  Alternative log level setting

EXAMPLES:
    # Start with defaults (http://127.0.0.1:5004/mcp)
    session-mux

    # Listen on all interfaces, reap sessions idle for 10 minutes
    session-mux -H 0.0.0.0 -p 8080 --idle-timeout 600

    # Start with config file
    session-mux -c /etc/session-mux/config.json

    # Run under a process-spawning client
    session-mux --stdio
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("session-mux {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug, Error)]
pub enum ArgsError {
    #[error("{0}")]
    Lexopt(#[from] lexopt::Error),

    #[error("invalid value for --{0}: '{1}'")]
    InvalidValue(&'static str, String),

    #[error("unexpected argument: '{0}'")]
    UnexpectedArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<OsString> {
        std::iter::once("session-mux")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn test_default_args() {
        let result = parse_args_from(args(&[])).unwrap();
        assert!(result.host.is_none());
        assert!(result.port.is_none());
        assert!(!result.stdio);
    }

    #[test]
    fn test_host_port() {
        let result = parse_args_from(args(&["-H", "0.0.0.0", "-p", "8080"])).unwrap();
        assert_eq!(result.host.unwrap().to_string(), "0.0.0.0");
        assert_eq!(result.port, Some(8080));
    }

    #[test]
    fn test_endpoint() {
        let result = parse_args_from(args(&["--endpoint", "/rpc"])).unwrap();
        assert_eq!(result.endpoint.as_deref(), Some("/rpc"));

        assert!(parse_args_from(args(&["-e", "rpc"])).is_err());
    }

    #[test]
    fn test_stdio_and_idle_timeout() {
        let result = parse_args_from(args(&["--stdio", "--idle-timeout", "30"])).unwrap();
        assert!(result.stdio);
        assert_eq!(result.idle_timeout, Some(30));
    }

    #[test]
    fn test_invalid_idle_timeout() {
        let err = parse_args_from(args(&["--idle-timeout", "-5"])).unwrap_err();
        assert!(err.to_string().contains("idle-timeout"));
    }

    #[test]
    fn test_help_and_version_flags() {
        assert!(parse_args_from(args(&["-h"])).unwrap().help);
        assert!(parse_args_from(args(&["--version"])).unwrap().version);
    }

    #[test]
    fn test_unexpected_positional() {
        let result = parse_args_from(args(&["serve"]));
        assert!(matches!(result, Err(ArgsError::UnexpectedArgument(_))));
    }
}
