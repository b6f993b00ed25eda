//! Per-request admission orchestration.

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::identity::client_identity;
use crate::response::RejectionBody;
use crate::server::AppState;
use crate::strategies::Verdict;

pub(crate) fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Admission middleware: resolves a policy for the request and either
/// forwards it (with informational headers) or short-circuits with 429.
///
/// Store failure is handled per the configured fail mode: closed (500, the
/// default) or open (forward without headers).
pub async fn admission_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let Some(route) = state.resolver.resolve(&method, &path) else {
        return next.run(request).await;
    };

    let identity = client_identity(&request);
    let strategy = route.strategy();
    let now_ms = unix_ms();

    match strategy.admit(state.store.as_ref(), &identity, &path, now_ms).await {
        Ok(verdict) if verdict.allowed => {
            let mut response = next.run(request).await;
            apply_headers(&mut response, &verdict);
            response
        }
        Ok(verdict) => {
            debug!(
                target: "gatekeep::middleware",
                strategy = strategy.name(),
                %identity,
                %path,
                "request throttled"
            );
            let mut response =
                (StatusCode::TOO_MANY_REQUESTS, Json(RejectionBody::rate_limited()))
                    .into_response();
            apply_headers(&mut response, &verdict);
            if let Some(retry_after) = verdict.retry_after {
                if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                    response
                        .headers_mut()
                        .insert(HeaderName::from_static("retry-after"), value);
                }
            }
            response
        }
        Err(err) => {
            warn!(
                target: "gatekeep::middleware",
                strategy = strategy.name(),
                %identity,
                %path,
                error = %err,
                "admission check failed"
            );
            if state.fail_open {
                next.run(request).await
            } else {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(RejectionBody::admission_failed()),
                )
                    .into_response()
            }
        }
    }
}

fn apply_headers(response: &mut Response, verdict: &Verdict) {
    for (name, value) in &verdict.headers {
        if let Ok(value) = HeaderValue::from_str(value) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(name), value);
        }
    }
}

/// Request/response logging in front of the admission layer.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let identity = client_identity(&request);

    info!(
        target: "gatekeep::middleware",
        method = %method,
        uri = %uri,
        %identity,
        "incoming request"
    );

    let response = next.run(request).await;

    info!(
        target: "gatekeep::middleware",
        method = %method,
        uri = %uri,
        status = %response.status(),
        "request completed"
    );

    response
}
