//! Operator HTTP surface.
//!
//! One axum router carries both faces of the service: the vendor-facing
//! webhook endpoint (HMAC-verified, always answers 200 so the vendor stops
//! retrying) and bearer-token operator controls for polling, conversations,
//! and sends. Spawned as a background task from `serve`.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use shamba_core::config::ApiConfig;
use shamba_core::message::MessageCategory;
use shamba_core::phone;
use shamba_engine::{ConversationStore, Outbox};
use shamba_ingest::{Poller, WebhookRouter};
use shamba_store::Store;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    webhook: Arc<WebhookRouter>,
    poller: Arc<Poller>,
    conversations: Arc<ConversationStore>,
    outbox: Arc<Outbox>,
    store: Store,
    api_key: Option<String>,
    uptime: Instant,
}

/// Constant-time string comparison to prevent timing attacks on API token validation.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check bearer token auth. Returns `None` if authorized, `Some(response)` if rejected.
fn check_auth(headers: &HeaderMap, api_key: &Option<String>) -> Option<(StatusCode, Json<Value>)> {
    let key = match api_key {
        Some(k) => k,
        None => return None, // No auth configured — allow all.
    };

    let header = match headers.get("authorization") {
        Some(h) => h,
        None => {
            return Some((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "missing Authorization header"})),
            ));
        }
    };

    let value = match header.to_str() {
        Ok(v) => v,
        Err(_) => {
            return Some((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid Authorization header"})),
            ));
        }
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if constant_time_eq(token, key) => None, // Authorized.
        _ => Some((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid token"})),
        )),
    }
}

/// `POST /webhook/sms` — vendor callback for inbound SMS and delivery
/// lifecycle events.
///
/// Authenticated by HMAC signature headers (when a secret is configured),
/// not by the operator bearer token. Always answers 200: a 5xx would put the
/// vendor into a retry loop against a payload that will never parse better.
async fn webhook_sms(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: String,
) -> Json<Value> {
    let timestamp = headers.get("x-timestamp").and_then(|h| h.to_str().ok());
    let signature = headers.get("x-signature").and_then(|h| h.to_str().ok());

    let reply = state.webhook.handle(&body, timestamp, signature).await;
    Json(json!({
        "success": reply.success,
        "message": reply.message,
        "processed": reply.processed,
    }))
}

/// `GET /health` — liveness plus a glance at the moving parts.
async fn health(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    let db = match state.store.inbound_counts().await {
        Ok(_) => "ok",
        Err(e) => {
            error!("health db check failed: {e}");
            "error"
        }
    };

    Ok(Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime.elapsed().as_secs(),
        "db": db,
        "polling": state.poller.stats().is_running,
        "conversations": state.conversations.len(),
    })))
}

/// `GET /polling/stats`
async fn polling_stats(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let stats = state.poller.stats();
    Ok(Json(json!({
        "is_running": stats.is_running,
        "processed_count": stats.processed_count,
        "poll_interval_secs": stats.poll_interval_secs,
    })))
}

#[derive(Debug, Deserialize)]
struct PollingStartRequest {
    interval_secs: Option<u64>,
}

/// `POST /polling/start` — optional `{"interval_secs": n}` body.
async fn polling_start(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Option<Json<PollingStartRequest>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    let interval = body
        .and_then(|Json(req)| req.interval_secs)
        .unwrap_or(shamba_ingest::polling::MIN_POLL_INTERVAL_SECS);
    state.poller.start(interval);

    let stats = state.poller.stats();
    Ok(Json(json!({
        "is_running": stats.is_running,
        "poll_interval_secs": stats.poll_interval_secs,
    })))
}

/// `POST /polling/stop`
async fn polling_stop(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    state.poller.stop();
    Ok(Json(json!({"is_running": state.poller.stats().is_running})))
}

/// `POST /polling/poll` — one manual poll, outside the timer.
async fn polling_poll(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    match state.poller.poll_once().await {
        Ok(processed) => Ok(Json(json!({"processed": processed}))),
        Err(e) => {
            warn!("manual poll failed: {e}");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": format!("poll failed: {e}")})),
            ))
        }
    }
}

/// `GET /conversations` — active in-memory contexts, newest first.
async fn conversations_list(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let all = state.conversations.get_all();
    Ok(Json(json!({"count": all.len(), "conversations": all})))
}

/// `DELETE /conversations`
async fn conversations_clear_all(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let cleared = state.conversations.clear_all();
    Ok(Json(json!({"cleared": cleared})))
}

/// `DELETE /conversations/{phone}`
async fn conversations_clear_one(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(raw_phone): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    let phone = phone::normalize(&raw_phone).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.to_string()})),
        )
    })?;

    if state.conversations.clear(&phone) {
        Ok(Json(json!({"cleared": 1})))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no conversation for {phone}")})),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    recipients: Vec<String>,
    message: String,
    category: Option<String>,
    /// When true, all recipients go out as one vendor batch call instead of
    /// one call per recipient.
    #[serde(default)]
    batch: bool,
}

/// `POST /send` — logged send to one or many recipients.
///
/// Partial bulk failure is a normal outcome reported in the counts, never a
/// 5xx. Invalid input (bad phone, empty message) is the caller's problem and
/// gets a 400 before anything is sent.
async fn send(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<SendRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    let Json(request) = body.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("invalid request: {e}")})),
        )
    })?;

    if request.recipients.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "recipients must not be empty"})),
        ));
    }
    if request.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "message must not be empty"})),
        ));
    }

    let category = match request.category.as_deref() {
        Some(c) => MessageCategory::from_str(c).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": e.to_string()})),
            )
        })?,
        None => MessageCategory::General,
    };

    let mut phones = Vec::with_capacity(request.recipients.len());
    for raw in &request.recipients {
        let phone = phone::normalize(raw).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("{raw}: {e}")})),
            )
        })?;
        phones.push(phone);
    }

    let report = if request.batch {
        state
            .outbox
            .broadcast_logged(&phones, &request.message, category)
            .await
    } else {
        state
            .outbox
            .send_bulk_logged(&phones, &request.message, category)
            .await
    };
    let report = report.map_err(|e| {
        error!("send failed: {e}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
    })?;

    info!(
        sent = report.sent,
        failed = report.failed,
        category = category.as_str(),
        "operator send"
    );
    Ok(Json(json!({"sent": report.sent, "failed": report.failed})))
}

/// Build the axum router with shared state.
fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/webhook/sms", post(webhook_sms))
        .route("/health", get(health))
        .route("/polling/stats", get(polling_stats))
        .route("/polling/start", post(polling_start))
        .route("/polling/stop", post(polling_stop))
        .route("/polling/poll", post(polling_poll))
        .route("/conversations", get(conversations_list))
        .route("/conversations", delete(conversations_clear_all))
        .route("/conversations/{phone}", delete(conversations_clear_one))
        .route("/send", post(send))
        .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state)
}

/// Start the API server. Spawned from `serve` in main.
#[allow(clippy::too_many_arguments)]
pub async fn serve(
    config: ApiConfig,
    webhook: Arc<WebhookRouter>,
    poller: Arc<Poller>,
    conversations: Arc<ConversationStore>,
    outbox: Arc<Outbox>,
    store: Store,
    uptime: Instant,
) {
    let api_key = if config.api_key.is_empty() {
        None
    } else {
        Some(config.api_key.clone())
    };

    let state = ApiState {
        webhook,
        poller,
        conversations,
        outbox,
        store,
        api_key,
        uptime,
    };

    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("API server failed to bind to {addr}: {e}");
            return;
        }
    };

    info!("API server listening on {addr}");

    if let Err(e) = axum::serve(listener, app).await {
        error!("API server error: {e}");
    }
}
