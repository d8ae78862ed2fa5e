//! REST API handlers.
//!
//! Each handler delegates to the `Watchdog` and returns JSON responses.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::{info, warn};

use pingward_health::RefreshError;
use pingward_state::{ClientSpec, StateError};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn state_error(e: &StateError) -> axum::response::Response {
    match e {
        StateError::UnknownClient(_) => {
            error_response(&e.to_string(), StatusCode::NOT_FOUND).into_response()
        }
        StateError::InvalidSpec(_) => {
            error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response()
        }
    }
}

fn missing(param: &str) -> axum::response::Response {
    error_response(
        &format!("missing query parameter: {param}"),
        StatusCode::BAD_REQUEST,
    )
    .into_response()
}

/// Query carrying the client id.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientQuery {
    pub client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallQuery {
    pub client_id: Option<String>,
    pub chat_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

// ── Service ────────────────────────────────────────────────────

/// GET /
pub async fn banner(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({
        "service": state.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "clients": state.watchdog.registry().len().await,
        "queued": state.watchdog.sequencer().len(),
    }))
}

// ── Clients ────────────────────────────────────────────────────

/// GET /clients
pub async fn list_clients(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.watchdog.statuses().await)
}

/// GET /clients/:id
pub async fn get_client(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.watchdog.status(&id).await {
        Some(status) => ApiResponse::ok(status).into_response(),
        None => error_response("client not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// PUT /clients
pub async fn replace_clients(
    State(state): State<ApiState>,
    Json(specs): Json<Vec<ClientSpec>>,
) -> impl IntoResponse {
    let summary = state.watchdog.registry().upsert_all(specs).await;
    ApiResponse::ok(summary)
}

/// GET /refreshMap
pub async fn refresh_map(State(state): State<ApiState>) -> impl IntoResponse {
    match state.watchdog.refresh().await {
        Ok(summary) => ApiResponse::ok(summary).into_response(),
        Err(e @ RefreshError::NotConfigured) => {
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
        Err(e) => {
            warn!(error = %e, "on-demand refresh failed");
            error_response(&e.to_string(), StatusCode::BAD_GATEWAY).into_response()
        }
    }
}

// ── Liveness ───────────────────────────────────────────────────

/// GET /receive?clientId=
pub async fn receive(
    State(state): State<ApiState>,
    Query(query): Query<ClientQuery>,
) -> impl IntoResponse {
    let Some(client_id) = query.client_id else {
        return missing("clientId");
    };
    match state.watchdog.heartbeat(&client_id).await {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => {
            warn!(%client_id, "heartbeat for unknown client");
            state_error(&e)
        }
    }
}

/// GET /tgclientoff/:process_id?clientId=
pub async fn client_active(
    State(state): State<ApiState>,
    Path(process_id): Path<String>,
    Query(query): Query<ClientQuery>,
) -> impl IntoResponse {
    let Some(client_id) = query.client_id else {
        return missing("clientId");
    };
    match state.watchdog.activate(&client_id, &process_id).await {
        Ok(activated) => ApiResponse::ok(activated).into_response(),
        Err(e) => state_error(&e),
    }
}

/// GET /requestcall?clientId=&chatId=&type=
pub async fn request_call(
    State(state): State<ApiState>,
    Query(query): Query<CallQuery>,
) -> impl IntoResponse {
    let Some(client_id) = query.client_id else {
        return missing("clientId");
    };
    let Some(chat_id) = query.chat_id else {
        return missing("chatId");
    };
    let Some(kind) = query.kind else {
        return missing("type");
    };

    match state.watchdog.request_call(&client_id, &chat_id, &kind).await {
        Ok(forwarded) => {
            info!(%client_id, forwarded, "call request handled");
            ApiResponse::ok(forwarded).into_response()
        }
        Err(e) => state_error(&e),
    }
}
