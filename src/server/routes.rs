//! Axum route handlers for the endpoint-hub HTTP server.
//!
//! # Routes
//!
//! - `GET  /health`          - Status, crate version and the published snapshot size
//! - `POST /reload`          - Run a reload cycle now
//! - `GET  /reload/status`   - Phase, counters and recent cycles
//! - `GET  /catalog`         - Full catalog pull (filterable)
//! - `GET  /catalog/version` - `{version, activeCount, digest}` for pollers
//! - `GET  /catalog/events`  - Server-sent change events with keep-alive
//! - `ANY  /api/*path`       - Dispatch to the capability at `/*path`

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{any, get, post},
    Json, Router,
};
use futures::Stream;
use serde_json::{Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::capabilities::{HandlerError, HandlerResponse};
use crate::catalog::{CallerPlan, RecordFilter};
use crate::hub::EndpointHub;
use crate::notify::LiveMessage;
use crate::registry::{DispatchError, DispatchRequest};
use crate::reload::{TriggerOrigin, TriggerOutcome};

/// Header carrying the caller's subscription plan.
///
/// Trusted as-is: an authenticating layer in front of this server must set
/// it from the verified caller and strip any client-supplied value.
pub const ACCESS_TIER_HEADER: &str = "x-access-tier";

/// Header carrying the caller's API key, used as the rate-limit identity.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<EndpointHub>,
}

impl AppState {
    pub fn new(hub: Arc<EndpointHub>) -> Self {
        Self { hub }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/reload", post(reload_handler))
        .route("/reload/status", get(reload_status_handler))
        .route("/catalog", get(catalog_handler))
        .route("/catalog/version", get(catalog_version_handler))
        .route("/catalog/events", get(catalog_events_handler))
        .route("/api/*path", any(dispatch_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

/// GET /health - liveness probe.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.hub.registry().load();
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "endpoint-hub",
        "snapshotVersion": snapshot.version(),
        "endpoints": snapshot.len(),
    }))
}

/// POST /reload - run a manual reload cycle.
///
/// - 200 with the cycle report on success
/// - 409 when a cycle is already running
/// - 500 with the cycle report when the cycle failed
async fn reload_handler(State(state): State<AppState>) -> Response {
    match state.hub.trigger(TriggerOrigin::Manual).await {
        TriggerOutcome::Completed(report) => (StatusCode::OK, Json(report)).into_response(),
        TriggerOutcome::Skipped => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "status": "skipped",
                "error": "a reload is already running",
            })),
        )
            .into_response(),
        TriggerOutcome::Failed(report) => (StatusCode::INTERNAL_SERVER_ERROR, Json(report)).into_response(),
    }
}

/// GET /reload/status
async fn reload_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.status())
}

/// GET /catalog - full catalog pull, used by subscribers after a reconnect.
async fn catalog_handler(
    State(state): State<AppState>,
    Query(filter): Query<RecordFilter>,
) -> Result<Json<Value>, ApiError> {
    let version = state.hub.notifier().version();
    let records = state
        .hub
        .list(filter)
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    Ok(Json(serde_json::json!({
        "version": version,
        "count": records.len(),
        "endpoints": records,
    })))
}

/// GET /catalog/version
async fn catalog_version_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let version = state
        .hub
        .catalog_version()
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(version))
}

/// GET /catalog/events - SSE stream of change events and liveness pings.
///
/// A client that falls behind is detached; its stream ends and it should
/// reconnect and pull `/catalog`.
async fn catalog_events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.hub.subscribe();
    tracing::debug!(subscriber = %subscription.id, "live subscriber connected");

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let message = subscription.receiver.recv().await?;
        Some((Ok::<_, Infallible>(sse_event(&message)), subscription))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn sse_event(message: &LiveMessage) -> Event {
    match message {
        LiveMessage::Change(event) => {
            let json = serde_json::to_string(event).unwrap_or_default();
            Event::default()
                .event(event.event_type())
                .id(event.id.to_string())
                .data(json)
        }
        LiveMessage::Ping { timestamp } => Event::default().event("ping").data(timestamp.to_rfc3339()),
    }
}

/// ANY /api/*path - dispatch to a capability.
///
/// Query parameters and a JSON object body are merged into the handler
/// params; body fields win.
///
/// The caller plan is read from [`ACCESS_TIER_HEADER`] without verification,
/// and [`API_KEY_HEADER`] only keys the rate-limit windows. Both must come
/// from an upstream auth layer.
async fn dispatch_handler(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let plan = match headers.get(ACCESS_TIER_HEADER).map(|v| v.to_str()) {
        None => CallerPlan::Free,
        Some(Ok(raw)) => match raw.parse::<CallerPlan>() {
            Ok(plan) => plan,
            Err(e) => return api_error(StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        },
        Some(Err(_)) => {
            return api_error(StatusCode::BAD_REQUEST, "invalid x-access-tier header").into_response()
        }
    };
    let caller = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    let params = match merge_params(query, &body) {
        Ok(params) => params,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, format!("invalid JSON body: {}", e)).into_response(),
    };

    let request = DispatchRequest {
        path: format!("/{}", path.trim_start_matches('/')),
        method: method.as_str().to_string(),
        plan,
        caller,
        params,
    };

    match state.hub.dispatch(request).await {
        Ok(HandlerResponse::Json(value)) => Json(value).into_response(),
        Ok(HandlerResponse::Binary { content_type, body }) => {
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) => dispatch_error_response(e),
    }
}

fn merge_params(query: HashMap<String, String>, body: &Bytes) -> Result<Value, serde_json::Error> {
    let mut params: Map<String, Value> = query.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
    if body.is_empty() {
        return Ok(Value::Object(params));
    }
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(fields) => {
            params.extend(fields);
            Ok(Value::Object(params))
        }
        other if params.is_empty() => Ok(other),
        other => {
            params.insert("body".to_string(), other);
            Ok(Value::Object(params))
        }
    }
}

fn dispatch_error_response(err: DispatchError) -> Response {
    let message = err.to_string();
    match err {
        DispatchError::NotFound { .. } => api_error(StatusCode::NOT_FOUND, message).into_response(),
        DispatchError::MethodNotAllowed { allowed, .. } => (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, allowed.join(", "))],
            Json(serde_json::json!({ "error": message, "allowed": allowed })),
        )
            .into_response(),
        DispatchError::Disabled { .. } => api_error(StatusCode::FORBIDDEN, message).into_response(),
        DispatchError::Forbidden { required, .. } => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": message, "requiredTier": required })),
        )
            .into_response(),
        DispatchError::RateLimited { retry_after_ms } => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_ms.div_ceil(1000).max(1).to_string())],
            Json(serde_json::json!({ "error": message })),
        )
            .into_response(),
        DispatchError::Handler(HandlerError::BadRequest(_)) => {
            api_error(StatusCode::BAD_REQUEST, message).into_response()
        }
        DispatchError::Handler(HandlerError::Upstream(_)) => {
            api_error(StatusCode::BAD_GATEWAY, message).into_response()
        }
        DispatchError::Handler(HandlerError::Internal(_)) => {
            tracing::error!(error = %message, "capability handler failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
