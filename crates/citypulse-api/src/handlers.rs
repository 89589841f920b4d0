//! Route handler functions.
//!
//! Handlers extract JSON bodies and headers, call into the
//! [`ChatOrchestrator`](citypulse_chat::ChatOrchestrator) and return JSON.

use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, HeaderMap};
use axum::Json;
use serde::{Deserialize, Serialize};

use citypulse_core::types::{Intent, Place};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request and response types
// =============================================================================

/// Body of `POST /chat`. Both fields are optional on the wire so that
/// missing values produce the documented errors rather than a rejection.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub places: Option<Vec<Place>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionIdResponse {
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub completion_configured: bool,
    pub maps_configured: bool,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /generate_session_id - mint an id from the client address and
/// user agent.
pub async fn generate_session_id(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Json<SessionIdResponse> {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(&headers, peer);
    let user_agent = header_str(&headers, "user-agent");
    let session_id = state
        .orchestrator
        .mint_session_id(ip.as_deref(), user_agent.as_deref());
    tracing::debug!(session_id = %session_id, "Minted session id");
    Json(SessionIdResponse { session_id })
}

/// POST /chat - handle one conversational turn.
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        tracing::debug!(error = %e, "Rejected chat body");
        ApiError::BadRequest("Request body must be a JSON object".to_string())
    })?;

    let message = request.message.unwrap_or_default();
    let reply = state
        .orchestrator
        .handle_turn(&message, request.session_id.as_deref())
        .await?;

    Ok(Json(ChatResponse {
        response: reply.response,
        intent: reply.intent,
        places: reply.places,
    }))
}

/// GET /health - liveness plus collaborator configuration.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        completion_configured: state.orchestrator.has_completion(),
        maps_configured: state.orchestrator.has_places(),
    })
}

// =============================================================================
// Header helpers
// =============================================================================

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// First address in `X-Forwarded-For`, else `X-Real-IP`, else the socket
/// peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
        .filter(|v| !v.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}
