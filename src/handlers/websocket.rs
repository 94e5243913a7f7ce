use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    extract::ws::{WebSocket, WebSocketUpgrade},
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, info};

use crate::{
    api::dto::ErrorResponse, app_state::AppState, protocol::WebSocketTransport,
    service::PtySession,
};

/// Attach a WebSocket viewer to `session_id`, spawning the session when it does not exist.
pub async fn websocket_handler_with_id(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<AppState>,
) -> Response {
    let session = match state.registry.get_or_create(&session_id).await {
        Ok((session, created)) => {
            if created {
                info!("Created session {} for a websocket viewer", session_id);
            }
            session
        }
        Err(e) => {
            error!("Failed to start session {}: {}", session_id, e);
            let body = ErrorResponse {
                error: true,
                message: e.to_string(),
                code: Some(500),
            };
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        }
    };

    let address = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, address, session, state))
}

pub async fn handle_socket(
    socket: WebSocket,
    address: String,
    session: Arc<PtySession>,
    state: AppState,
) {
    let transport = WebSocketTransport::new(socket, address);
    session.handle_receiver(Box::new(transport)).await;

    if state.config.once {
        info!("Single-use mode: stopping session {} and the server", session.id());
        session.stop().await;
        state.registry.remove(&session).await;
        state.shutdown.cancel();
    }
}
