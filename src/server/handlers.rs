//! HTTP handlers for the relay API.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::RelayError;
use crate::rpc::{JsonRpcRequest, JsonRpcResponse};
use crate::server::RelayState;
use crate::server::types::*;
use crate::session::{Account, BrowserInfo, LogEntry, SessionInfo};
use crate::shim::render_provider_script;

fn parse_session_id(raw: &str) -> Result<Uuid, (StatusCode, String)> {
    Uuid::parse_str(raw).map_err(|_| (StatusCode::BAD_REQUEST, "Invalid session ID".to_string()))
}

/// Map transport-level relay failures onto HTTP statuses. Protocol failures
/// (conflict, timeout) never reach this path — they ride in the JSON-RPC
/// envelope.
fn relay_error(error: RelayError) -> (StatusCode, String) {
    match &error {
        RelayError::SessionNotFound(_) => (StatusCode::NOT_FOUND, error.to_string()),
        RelayError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, error.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    }
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn create_session_handler(
    State(state): State<Arc<RelayState>>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), (StatusCode, String)> {
    if !state.create_rate_limiter.check() {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            "Too many session creations".to_string(),
        ));
    }

    let browser = match &state.browser {
        Some(provisioner) => match provisioner.create().await {
            Ok(remote) => Some(BrowserInfo {
                browser_session_id: remote.id,
                live_view_url: remote.live_view_url,
            }),
            Err(error) => {
                // The relay itself works without a remote browser; the
                // session just carries no live view.
                tracing::warn!(%error, "browser provisioning failed");
                None
            }
        },
        None => None,
    };

    let account = Account {
        address: body.address,
        chain_id: body.chain_id,
    };
    let session_id = state
        .relay
        .create_session(account, body.task, browser)
        .await
        .map_err(relay_error)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse { session_id }),
    ))
}

pub async fn rpc_handler(
    State(state): State<Arc<RelayState>>,
    Path(id): Path<String>,
    Json(request): Json<JsonRpcRequest>,
) -> Result<Json<JsonRpcResponse>, (StatusCode, String)> {
    let session_id = parse_session_id(&id)?;
    let response = state
        .relay
        .handle_rpc(session_id, request)
        .await
        .map_err(relay_error)?;
    Ok(Json(response))
}

pub async fn session_info_handler(
    State(state): State<Arc<RelayState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, (StatusCode, String)> {
    let session_id = parse_session_id(&id)?;
    let info = state
        .relay
        .session_info(session_id)
        .await
        .map_err(relay_error)?;
    Ok(Json(info))
}

/// Drain the pending request. Responds `{}` when the slot is empty;
/// delete-on-read, so a drained request is never served twice.
pub async fn peek_request_handler(
    State(state): State<Arc<RelayState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let session_id = parse_session_id(&id)?;
    let request = state
        .relay
        .peek_request(session_id)
        .await
        .map_err(relay_error)?;
    let body = match request {
        Some(request) => serde_json::to_value(request)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?,
        None => json!({}),
    };
    Ok(Json(body))
}

pub async fn post_response_handler(
    State(state): State<Arc<RelayState>>,
    Path(id): Path<String>,
    Json(body): Json<PostResponseRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let session_id = parse_session_id(&id)?;
    state
        .relay
        .post_response(session_id, body.result)
        .await
        .map_err(relay_error)?;
    Ok(Json(json!({})))
}

pub async fn append_log_handler(
    State(state): State<Arc<RelayState>>,
    Path(id): Path<String>,
    Json(entry): Json<LogEntry>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    let session_id = parse_session_id(&id)?;
    state
        .relay
        .append_log(session_id, entry)
        .await
        .map_err(relay_error)?;
    Ok(Json(MessageResponse {
        message: "Log appended".to_string(),
    }))
}

pub async fn get_log_handler(
    State(state): State<Arc<RelayState>>,
    Path(id): Path<String>,
) -> Result<Json<LogsResponse>, (StatusCode, String)> {
    let session_id = parse_session_id(&id)?;
    let logs = state.relay.get_log(session_id).await.map_err(relay_error)?;
    Ok(Json(LogsResponse { logs }))
}

/// Serve the per-session injected provider script.
pub async fn provider_script_handler(
    State(state): State<Arc<RelayState>>,
    Path(id): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    let session_id = parse_session_id(&id)?;
    // Unknown sessions get a 404, not a script that can never connect.
    state
        .relay
        .session_info(session_id)
        .await
        .map_err(relay_error)?;

    let script = render_provider_script(&state.public_url, session_id);
    let mut response = script.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/javascript; charset=utf-8"),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, max-age=0"),
    );
    Ok(response)
}

/// Proxy the session's recording URL from the provisioning collaborator.
pub async fn recording_handler(
    State(state): State<Arc<RelayState>>,
    Path(id): Path<String>,
) -> Result<Json<RecordingResponse>, (StatusCode, String)> {
    let session_id = parse_session_id(&id)?;
    let info = state
        .relay
        .session_info(session_id)
        .await
        .map_err(relay_error)?;

    let recording_url = match (&state.browser, info.browser_session_id.as_deref()) {
        (Some(provisioner), Some(browser_session_id)) => provisioner
            .recording(browser_session_id)
            .await
            .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?,
        _ => None,
    };

    Ok(Json(RecordingResponse { recording_url }))
}
