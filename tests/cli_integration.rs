//! CLI integration tests.
//!
//! These tests verify the CLI argument parsing and configuration loading.

use std::ffi::OsString;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

use session_mux::api::{create_router_at, AppState};
use session_mux::cli::{parse_args_from, Args};
use session_mux::config::{Config, Transport};

fn args(args: &[&str]) -> Vec<OsString> {
    std::iter::once("session-mux")
        .chain(args.iter().copied())
        .map(OsString::from)
        .collect()
}

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

// ============================================================================
// CLI Argument Tests
// ============================================================================

#[test]
fn test_cli_defaults() {
    let result = parse_args_from(args(&[])).unwrap();

    assert!(result.host.is_none());
    assert!(result.port.is_none());
    assert!(result.endpoint.is_none());
    assert!(result.config.is_none());
    assert!(result.idle_timeout.is_none());
    assert!(!result.stdio);
    assert!(!result.help);
    assert!(!result.version);
}

#[test]
fn test_cli_full_options() {
    let result = parse_args_from(args(&[
        "-H",
        "0.0.0.0",
        "-p",
        "8080",
        "-e",
        "/rpc",
        "-l",
        "debug",
        "--idle-timeout",
        "600",
    ]))
    .unwrap();

    assert_eq!(result.host.unwrap().to_string(), "0.0.0.0");
    assert_eq!(result.port, Some(8080));
    assert_eq!(result.endpoint.as_deref(), Some("/rpc"));
    assert_eq!(result.log_level.as_deref(), Some("debug"));
    assert_eq!(result.idle_timeout, Some(600));
}

#[test]
fn test_cli_rejects_bad_values() {
    assert!(parse_args_from(args(&["-p", "99999"])).is_err());
    assert!(parse_args_from(args(&["-H", "localhost"])).is_err());
    assert!(parse_args_from(args(&["--unknown"])).is_err());
    assert!(parse_args_from(args(&["-p"])).is_err());
}

// ============================================================================
// Configuration Layering Tests
// ============================================================================

#[test]
fn test_file_then_cli_priority() {
    let file = config_file(
        r#"{
            "server": { "host": "0.0.0.0", "port": 7000, "endpoint": "/rpc" },
            "sessions": { "idle_timeout_secs": 60, "reap_interval_secs": 5 }
        }"#,
    );

    let path = file.path().to_string_lossy().to_string();
    let cli = parse_args_from(args(&["-c", &path, "-p", "9000", "--stdio"])).unwrap();
    let config = Config::load(&cli).unwrap();

    // From the file.
    assert_eq!(config.server.endpoint, "/rpc");
    // CLI wins over the file.
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.transport, Transport::Stdio);

    let server = config.to_server_config().unwrap();
    assert_eq!(server.idle_timeout, Some(Duration::from_secs(60)));
    assert_eq!(server.reap_interval, Duration::from_secs(5));
}

#[test]
fn test_missing_config_file_fails() {
    let cli = Args {
        config: Some("/nonexistent/session-mux.json".into()),
        ..Args::default()
    };

    assert!(Config::load(&cli).is_err());
}

#[test]
fn test_invalid_endpoint_in_file_fails_validation() {
    let file = config_file(r#"{ "server": { "endpoint": "mcp" } }"#);

    let config = Config::from_file(file.path()).unwrap();
    assert!(config.to_server_config().is_err());
}

#[test]
fn test_parameterized_endpoint_fails_validation() {
    for endpoint in ["/mcp/:tenant", "/mcp/{tenant}", "/mcp/*rest"] {
        let file = config_file(&format!(r#"{{ "server": {{ "endpoint": "{endpoint}" }} }}"#));

        let config = Config::from_file(file.path()).unwrap();
        assert!(config.to_server_config().is_err(), "{endpoint} accepted");
    }
}

#[test]
fn test_validated_endpoint_builds_router() {
    let file = config_file(r#"{ "server": { "endpoint": "/api/v1/mcp" } }"#);

    let server = Config::from_file(file.path())
        .unwrap()
        .to_server_config()
        .unwrap();
    let _router = create_router_at(&server.endpoint, AppState::new());
}

#[test]
fn test_cli_overrides_log_level() {
    let cli = parse_args_from(args(&["-l", "trace"])).unwrap();
    let config = Config::load(&cli).unwrap();

    assert_eq!(config.log_filter(), "trace");
}
