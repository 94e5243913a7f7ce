/// Server implementation for tty_relay
use std::net::SocketAddr;

use axum::{Router, http::Method, routing::get};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::{app_state::AppState, handlers};

/// Build the application router with routes
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::rest::index))
        .route("/s/:session_id", get(handlers::rest::open_session))
        .route("/ws/:session_id", get(handlers::websocket::websocket_handler_with_id))
        .route("/l", get(handlers::rest::list_sessions))
        .route("/health", get(handlers::rest::health_check))
        .layer(cors)
        .with_state(state)
}

/// Run the HTTP server until Ctrl+C, SIGTERM or the state's shutdown token.
/// Every live session is stopped on the way down.
pub async fn run_server_with_graceful_shutdown(state: AppState) -> Result<(), std::io::Error> {
    let addr: SocketAddr = state
        .config
        .web_address
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let listener = TcpListener::bind(addr).await?;

    info!("Server running on http://{}", addr);
    info!("WebSocket viewers attach at ws://{}/ws/<session>", addr);

    let token = state.shutdown.clone();
    let registry = state.registry.clone();
    let graceful_shutdown = async move {
        let ctrl_c = async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal, initiating graceful shutdown..."),
                Err(e) => {
                    warn!("Failed to install Ctrl+C handler: {}", e);
                    std::future::pending::<()>().await
                }
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("Received SIGTERM signal, initiating graceful shutdown...");
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
            _ = token.cancelled() => info!("Shutdown requested, stopping server..."),
        }
        // Closing the sessions hangs up every viewer socket.
        registry.shutdown().await;
    };

    let router = build_router(state);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(graceful_shutdown)
    .await?;

    info!("Server shutdown complete");
    Ok(())
}
