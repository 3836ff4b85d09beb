//! session-mux binary entry point.

use std::sync::Arc;

use session_mux::app::DemoFactory;
use session_mux::config::{Config, Transport};
use session_mux::{api, cli, logging, stdio, MuxError, SessionManager};
use tracing::info;

#[tokio::main]
async fn main() -> session_mux::Result<()> {
    let args = cli::parse_args().map_err(|e| MuxError::Config(e.to_string()))?;

    if args.help {
        cli::print_help();
        return Ok(());
    }

    if args.version {
        cli::print_version();
        return Ok(());
    }

    let config = Config::load(&args).map_err(|e| MuxError::Config(e.to_string()))?;

    if let Err(e) = logging::init_with_filter(config.log_filter()) {
        eprintln!("session-mux: logging already initialized: {e}");
    }

    info!("session-mux v{}", env!("CARGO_PKG_VERSION"));

    let manager = SessionManager::start_with_buffer(
        Arc::new(DemoFactory::new()),
        config.sessions.notification_buffer,
    );

    match config.server.transport {
        Transport::Http => {
            let server_config = config
                .to_server_config()
                .map_err(|e| MuxError::Config(e.to_string()))?;
            api::serve_with_state(server_config, api::AppState::with_manager(manager)).await
        }
        Transport::Stdio => stdio::run(manager).await,
    }
}
