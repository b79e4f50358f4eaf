//! HTTP routes of the proxy.
//!
//! - `POST /logging_session/{session_id}` creates a session
//! - `DELETE /logging_session/{session_id}` deletes a session
//! - `GET /logging_session/{session_id}` describes a session
//! - `GET /logging_session` lists live sessions
//! - `GET /health` liveness probe
//! - `GET /logs/{session_id}/write/{kind}` writer WebSocket
//! - `GET /logs/{session_id}/read/{kind}` reader WebSocket

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use protocol::{HealthResponse, SessionInfo, SessionResponse};

use crate::network::websocket::{read_stream, write_stream};
use crate::session::{RelayError, SessionRegistry};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

impl RelayError {
    fn status(&self) -> StatusCode {
        match self {
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn session_id(&self) -> String {
        match self {
            RelayError::AlreadyExists(id)
            | RelayError::NotFound(id)
            | RelayError::InvalidSessionId(id) => id.clone(),
            _ => String::new(),
        }
    }
}

/// Admin failures become a `SessionResponse` error body.
impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = SessionResponse::error(self.session_id(), self.to_string());
        (self.status(), Json(body)).into_response()
    }
}

/// Builds the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/logging_session", get(list_sessions))
        .route(
            "/logging_session/{session_id}",
            get(get_session).post(create_session).delete(delete_session),
        )
        .route("/logs/{session_id}/write/{kind}", get(write_stream))
        .route("/logs/{session_id}/read/{kind}", get(read_stream))
        .with_state(state)
}

/// `GET /health`
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// `POST /logging_session/{session_id}`
async fn create_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, RelayError> {
    state.registry.create(&session_id)?;
    Ok(Json(SessionResponse::ok(session_id, "session created")))
}

/// `DELETE /logging_session/{session_id}`
async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, RelayError> {
    state.registry.delete(&session_id).await?;
    Ok(Json(SessionResponse::ok(session_id, "session deleted")))
}

/// `GET /logging_session/{session_id}`
async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfo>, RelayError> {
    let session = state.registry.lookup(&session_id)?;
    Ok(Json(session.info().await))
}

/// `GET /logging_session`
async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.list().await)
}
