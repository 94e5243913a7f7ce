/// REST API handlers for terminal session management
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
};
use tracing::{error, info};

use crate::{
    api::dto::{ErrorResponse, HealthResponse, SessionInfo},
    app_state::AppState,
};

/// Session opened when no id is given
pub const DEFAULT_SESSION_ID: &str = "1";

pub async fn index() -> Redirect {
    Redirect::temporary(&format!("/s/{}", DEFAULT_SESSION_ID))
}

/// Make sure the session exists and tell the client where to attach
pub async fn open_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get_or_create(&session_id).await {
        Ok((session, created)) => {
            if created {
                info!("Created session {} on request", session_id);
            }
            let info = SessionInfo {
                id: session_id.clone(),
                ws_path: AppState::ws_path(&session_id),
                created,
                attached: session.attached_count().await,
            };
            (StatusCode::OK, Json(info)).into_response()
        }
        Err(e) => {
            error!("Failed to start session {}: {}", session_id, e);
            let body = ErrorResponse {
                error: true,
                message: e.to_string(),
                code: Some(500),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

/// Ids of the live sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.registry.list().await)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        sessions: state.registry.len().await,
    })
}
