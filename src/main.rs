/// Main entry point for tty_relay
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, info_span};

use tty_relay::app_state::AppState;
use tty_relay::config::{ConfigLoader, init_logging};
use tty_relay::pty::PortablePtyFactory;
use tty_relay::server::run_server_with_graceful_shutdown;
use tty_relay::service::SessionRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional config path as the only argument
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);

    let config = ConfigLoader::new()
        .load_config(config_path.as_deref())
        .context("Failed to load configuration")?;
    let _log_guard = init_logging(&config.logging).context("Failed to initialize logging")?;

    info!(
        "Starting tty_relay: command {:?} {:?}, once = {}",
        config.command.name, config.command.args, config.once
    );

    let config = Arc::new(config);
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(PortablePtyFactory),
        config.clone(),
        info_span!("registry"),
    ));
    let state = AppState::new(registry, config);

    run_server_with_graceful_shutdown(state)
        .await
        .context("HTTP server failed")?;
    Ok(())
}
