// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP surface of the admission gate.
//!
//! The gate runs as middleware in front of a downstream router, and also
//! answers `/check` for proxies that ask for a decision without forwarding
//! the request through this service.

use crate::admission::Admission;
use crate::error::{AdmissionError, BlockedUrl};
use crate::sanitize::describe_changes;
use axum::{
    body::Body,
    extract::{ConnectInfo, Extension, Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared application state.
pub type AppState = Arc<Admission>;

/// Response header listing URLs rewritten by sanitization.
pub const URL_CHANGES_HEADER: &str = "x-url-changes";

/// Decision endpoint for external proxies.
pub const CHECK_PATH: &str = "/check";

/// The connecting client, already charged by the gate for this request.
#[derive(Debug, Clone)]
pub struct AdmittedClient {
    pub client_id: String,
    pub remaining: u32,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Decision request from an external proxy.
///
/// `client_id` is honoured only from a trusted proxy. Anyone else is judged
/// by their own address.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub urls: Option<Vec<Value>>,
}

/// Decision returned to an external proxy.
#[derive(Debug, Default, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_urls: Option<Vec<BlockedUrl>>,
}

/// One entry of the `X-URL-Changes` header.
#[derive(Debug, Serialize)]
struct UrlChange<'a> {
    original: &'a str,
    sanitized: &'a str,
    changes: Vec<&'static str>,
}

/// Research submission accepted by the downstream stand-in.
#[derive(Debug, Deserialize)]
pub struct ResearchRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Research task acknowledgement.
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub status: &'static str,
    pub received_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub urls: Vec<String>,
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        match self {
            AdmissionError::RateLimited { .. } => {
                let retry_after = self.retry_after_secs().unwrap_or_default();
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after.to_string())],
                    Json(json!({
                        "detail": self.to_string(),
                        "type": "rate_limit_exceeded",
                    })),
                )
                    .into_response()
            }
            AdmissionError::UrlsRejected(blocked) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Invalid URLs detected",
                    "blocked_urls": blocked,
                })),
            )
                .into_response(),
            AdmissionError::TooManyUrls { .. } => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Too many URLs",
                    "detail": self.to_string(),
                })),
            )
                .into_response(),
            AdmissionError::MalformedBody(ref detail) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Malformed request body",
                    "detail": detail,
                })),
            )
                .into_response(),
            AdmissionError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "detail": "Internal server error",
                    "type": "internal_error",
                })),
            )
                .into_response(),
        }
    }
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "admission-gate",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Decide on behalf of a proxy.
///
/// Always answers 200 with the decision in the body so the proxy can read
/// it, except for internal faults and a trusted proxy that names no client.
pub async fn check(
    State(state): State<AppState>,
    admitted: Option<Extension<AdmittedClient>>,
    Json(req): Json<CheckRequest>,
) -> Response {
    debug!(client = ?req.client_id, urls = ?req.urls.as_ref().map(Vec::len), "Processing admission check");

    let remaining = match (admitted, req.client_id) {
        (Some(Extension(admitted)), named) => {
            if let Some(named) = named.filter(|named| *named != admitted.client_id) {
                debug!(peer = %admitted.client_id, named = %named, "Ignoring client_id from untrusted peer");
            }
            admitted.remaining
        }
        (None, Some(client_id)) => match state.admit_client(&client_id) {
            Ok(remaining) => remaining,
            Err(err @ AdmissionError::RateLimited { .. }) => {
                return Json(CheckResponse {
                    allowed: false,
                    retry_after_secs: err.retry_after_secs(),
                    reason: Some(err.to_string()),
                    ..Default::default()
                })
                .into_response();
            }
            Err(err) => return err.into_response(),
        },
        (None, None) => {
            return AdmissionError::MalformedBody("client_id is required".into()).into_response();
        }
    };

    let Some(urls) = req.urls else {
        return Json(CheckResponse {
            allowed: true,
            remaining: Some(remaining),
            ..Default::default()
        })
        .into_response();
    };

    match state.admit_urls(&urls, Some(state.deadline())).await {
        Ok(sanitized) => Json(CheckResponse {
            allowed: true,
            remaining: Some(remaining),
            sanitized_urls: Some(sanitized),
            ..Default::default()
        })
        .into_response(),
        Err(AdmissionError::UrlsRejected(blocked)) => Json(CheckResponse {
            allowed: false,
            reason: Some("Invalid URLs detected".to_string()),
            remaining: Some(remaining),
            blocked_urls: Some(blocked),
            ..Default::default()
        })
        .into_response(),
        Err(err @ AdmissionError::TooManyUrls { .. }) => Json(CheckResponse {
            allowed: false,
            reason: Some(err.to_string()),
            remaining: Some(remaining),
            ..Default::default()
        })
        .into_response(),
        Err(err) => err.into_response(),
    }
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    state
        .metrics()
        .set_tracked_clients(state.limiter().tracked_clients());
    match state.metrics().render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Downstream stand-in for the research pipeline: acknowledges the task
/// with the URLs it would fetch.
pub async fn research(Json(req): Json<ResearchRequest>) -> (StatusCode, Json<TaskResponse>) {
    let task_id = uuid::Uuid::new_v4().to_string();
    info!(task_id = %task_id, urls = req.urls.len(), "Accepted research task");
    (
        StatusCode::ACCEPTED,
        Json(TaskResponse {
            task_id,
            status: "processing",
            received_at: chrono::Utc::now().to_rfc3339(),
            query: req.query,
            urls: req.urls,
        }),
    )
}

/// Rate-limit every non-exempt request, then check the `urls` of JSON
/// bodies posted under the URL-checked prefix.
pub async fn admission_middleware(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    let admission = &state.config().admission;
    if state.config().is_exempt(&path) {
        return next.run(request).await;
    }

    let Some(ConnectInfo(addr)) = connect_info else {
        error!(path = %path, "Client address unavailable");
        return AdmissionError::Internal("client address unavailable".into()).into_response();
    };
    let client_id = addr.ip().to_string();

    // A trusted proxy's checks are charged to the client it names
    if path == CHECK_PATH && state.is_trusted_proxy(addr.ip()) {
        debug!(proxy = %client_id, "Check from trusted proxy");
        return next.run(request).await;
    }

    match state.admit_client(&client_id) {
        Ok(remaining) => {
            request.extensions_mut().insert(AdmittedClient {
                client_id: client_id.clone(),
                remaining,
            });
        }
        Err(err) => return err.into_response(),
    }

    if request.method() != Method::POST || !admission.checks_urls(&path) {
        return next.run(request).await;
    }

    match rewrite_body(&state, request).await {
        Ok((request, changes)) => {
            let mut response = next.run(request).await;
            if let Some(value) = changes {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(URL_CHANGES_HEADER), value);
            }
            response
        }
        Err(err) => {
            info!(client = %client_id, path = %path, error = %err, "Request denied");
            err.into_response()
        }
    }
}

/// Replace the body's `urls` with their sanitized forms.
async fn rewrite_body(
    state: &Admission,
    request: Request,
) -> Result<(Request, Option<HeaderValue>), AdmissionError> {
    let (mut parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, state.config().admission.max_body_bytes)
        .await
        .map_err(|e| AdmissionError::MalformedBody(format!("unreadable body: {e}")))?;

    let mut document: Value = serde_json::from_slice(&bytes)
        .map_err(|e| AdmissionError::MalformedBody(format!("body is not valid JSON: {e}")))?;
    let object = document
        .as_object_mut()
        .ok_or_else(|| AdmissionError::MalformedBody("body must be a JSON object".into()))?;

    let urls = match object.get("urls") {
        None => return Ok((Request::from_parts(parts, Body::from(bytes)), None)),
        Some(Value::Array(urls)) => urls.clone(),
        Some(_) => {
            return Err(AdmissionError::MalformedBody("urls must be an array".into()));
        }
    };

    let sanitized = state.admit_urls(&urls, Some(state.deadline())).await?;

    let changes_header = url_changes_header(&urls, &sanitized);

    object.insert(
        "urls".to_string(),
        Value::Array(sanitized.into_iter().map(Value::String).collect()),
    );
    let body = serde_json::to_vec(&document)
        .map_err(|e| AdmissionError::Internal(format!("failed to encode body: {e}")))?;

    parts.headers.remove(header::CONTENT_LENGTH);
    parts
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok((Request::from_parts(parts, Body::from(body)), changes_header))
}

/// Encode the rewrites as the `X-URL-Changes` header value, if any.
fn url_changes_header(urls: &[Value], sanitized: &[String]) -> Option<HeaderValue> {
    let changes: Vec<UrlChange<'_>> = urls
        .iter()
        .zip(sanitized)
        .filter_map(|(original, sanitized)| {
            let original = original.as_str()?;
            (original != sanitized).then(|| UrlChange {
                original,
                sanitized,
                changes: describe_changes(original, sanitized),
            })
        })
        .collect();
    if changes.is_empty() {
        return None;
    }

    let encoded = serde_json::to_string(&changes).ok()?;
    match HeaderValue::from_str(&encoded) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("URL changes not representable as a header");
            None
        }
    }
}

/// Add the standard security headers to every response.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'"),
    );
    response
}

/// Put the gate in front of `downstream`.
pub fn router(state: AppState, downstream: Router) -> Router {
    let mut gate = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route(CHECK_PATH, post(check));
    if state.config().metrics.enabled {
        gate = gate.route(&state.config().metrics.path, get(metrics));
    }

    // Outermost first: trace, then headers, then the gate itself
    gate.with_state(Arc::clone(&state)).merge(downstream).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(security_headers))
            .layer(middleware::from_fn_with_state(state, admission_middleware)),
    )
}
