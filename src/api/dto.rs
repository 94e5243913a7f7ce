/// Data Transfer Objects (DTOs) for REST API endpoints
use serde::{Deserialize, Serialize};

/// Response DTO for a terminal session
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session id as addressed in the URL
    pub id: String,

    /// WebSocket path viewers connect to
    pub ws_path: String,

    /// Whether this request spawned the session
    pub created: bool,

    /// Number of viewers currently attached
    pub attached: usize,
}

/// Health check response
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always "ok" when the server answers
    pub status: String,

    /// Number of live sessions
    pub sessions: usize,
}

/// Generic error response
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Error flag
    pub error: bool,

    /// Error message
    pub message: String,

    /// Optional error code
    pub code: Option<u16>,
}
