//! keypool server binary.

use keypool_config::load_config;
use keypool_server::{build_state, logging_config, Server, ServerError};
use keypool_telemetry::{bootstrap_logging, init_logging};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Server failed");
        eprintln!("keypool-server: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ServerError> {
    let config = {
        let _bootstrap = bootstrap_logging();
        load_config().await?
    };
    init_logging(&logging_config(&config)?)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting keypool server");

    let state = build_state(&config)?;
    Server::new(config.server.clone(), state).run().await
}
