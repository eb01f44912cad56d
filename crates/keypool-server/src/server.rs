//! HTTP server implementation.

use crate::{error::ServerError, routes::create_router, state::AppState};
use keypool_config::ServerConfig;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// HTTP server for the dispatcher
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a new server
    #[must_use]
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Run until Ctrl+C or SIGTERM
    ///
    /// # Errors
    /// Returns error if the server fails to start or encounters a fatal error
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(shutdown_signal()).await
    }

    /// Run the server with a custom shutdown signal
    ///
    /// In-flight requests get `graceful_shutdown_timeout` to finish once
    /// `shutdown` resolves.
    ///
    /// # Errors
    /// Returns error if the server fails to start
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = self
            .config
            .socket_addr()
            .parse()
            .map_err(|e| ServerError::Bind(format!("{}: {e}", self.config.socket_addr())))?;
        let grace = self.config.graceful_shutdown_timeout;
        let router = create_router(self.state);

        info!(
            host = %self.config.host,
            port = self.config.port,
            "Starting HTTP server"
        );

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        info!(address = %addr, "Server listening");

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .into_future();
        let mut handle = tokio::spawn(serve);

        tokio::select! {
            joined = &mut handle => return flatten(joined),
            () = shutdown => {}
        }

        let _ = stop_tx.send(());
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(joined) => flatten(joined)?,
            Err(_) => {
                warn!(grace = ?grace, "Graceful shutdown timed out, dropping connections");
                handle.abort();
            }
        }

        info!("Server shutdown complete");
        Ok(())
    }
}

fn flatten(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), ServerError> {
    joined
        .map_err(|e| ServerError::Serve(e.to_string()))?
        .map_err(|e| ServerError::Serve(e.to_string()))
}

/// Shutdown signal handler
///
/// # Panics
/// Panics if signal handlers cannot be installed (should not happen on supported platforms)
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::app_state;
    use std::time::Duration;

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            graceful_shutdown_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let server = Server::new(local_config(), app_state(Vec::new()));
        let result = server
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_host_is_bind_error() {
        let config = ServerConfig {
            host: "not a host".to_string(),
            ..local_config()
        };
        let err = Server::new(config, app_state(Vec::new()))
            .run_until(std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Bind(_)));
    }
}
