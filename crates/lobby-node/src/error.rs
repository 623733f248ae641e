use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use lobby_core::game::JoinError;

use crate::bus::BusError;

pub type LobbyResult<T> = Result<T, LobbyError>;

/// Failure outcomes of lobby operations. Nothing past the `Lobby` boundary panics;
/// every operation reports one of these instead.
#[derive(Debug)]
pub enum LobbyError {
    /// Missing required identifier. A caller bug, never retried.
    InvalidArgument(String),
    /// Unknown connection or game.
    NotFound(String),
    /// Rejected by the session state machine.
    Conflict(JoinError),
    /// No execution node can take the game right now.
    ResourceExhausted(String),
    /// A replicated event collided with local state. Logged and resolved by adopting it.
    ReplicationAnomaly(String),
    Bus(BusError),
}

impl LobbyError {
    /// Human-readable reason sent to the client in `joinFailed`.
    pub fn client_reason(&self) -> String {
        match self {
            Self::Conflict(e) => e.to_string(),
            Self::NotFound(m) | Self::InvalidArgument(m) | Self::ResourceExhausted(m) => {
                m.clone()
            },
            Self::ReplicationAnomaly(_) | Self::Bus(_) => {
                "The lobby could not complete that request.".to_string()
            },
        }
    }
}

impl std::fmt::Display for LobbyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(m) => write!(f, "invalid argument: {m}"),
            Self::NotFound(m) => write!(f, "not found: {m}"),
            Self::Conflict(e) => write!(f, "conflict: {e}"),
            Self::ResourceExhausted(m) => write!(f, "resource exhausted: {m}"),
            Self::ReplicationAnomaly(m) => write!(f, "replication anomaly: {m}"),
            Self::Bus(e) => write!(f, "bus error: {e}"),
        }
    }
}

impl std::error::Error for LobbyError {}

impl From<JoinError> for LobbyError {
    fn from(e: JoinError) -> Self {
        Self::Conflict(e)
    }
}

impl From<BusError> for LobbyError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

/// REST-facing error with an HTTP status.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::ServiceUnavailable(m)
            | Self::Internal(m) => write!(f, "{m}"),
        }
    }
}

impl From<LobbyError> for AppError {
    fn from(e: LobbyError) -> Self {
        match e {
            LobbyError::InvalidArgument(m) => Self::BadRequest(m),
            LobbyError::NotFound(m) => Self::NotFound(m),
            LobbyError::Conflict(reason) => Self::Conflict(reason.to_string()),
            LobbyError::ResourceExhausted(m) => Self::ServiceUnavailable(m),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            Self::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            Self::ServiceUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
