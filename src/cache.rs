//! Read-through response caching on the shared store.
//!
//! GET responses are cached as a get-or-compute-and-store pattern keyed by
//! path and query. Write methods invalidate the whole cache namespace via
//! pattern delete. Cache failures are non-fatal: a store error degrades to
//! a normal uncached round trip.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::server::AppState;
use crate::store::store_key;

const MAX_CACHED_BODY: usize = 1024 * 1024;

fn cache_key(state: &AppState, path: &str, query: &str) -> String {
    store_key(&state.key_prefix, &["cache", path, query])
}

pub async fn cache_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    // Only the API surface is cached; operational endpoints stay live.
    if request.method() != Method::GET || !request.uri().path().starts_with("/api/") {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();
    let key = cache_key(&state, &path, &query);

    match state.store.get(&key).await {
        Ok(Some(cached)) => {
            let mut response = Response::new(Body::from(cached));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-cache"), HeaderValue::from_static("HIT"));
            return response;
        }
        Ok(None) => {}
        Err(err) => {
            warn!(key = %key, error = %err, "cache read failed, serving uncached");
        }
    }

    let response = next.run(request).await;
    if response.status() != StatusCode::OK {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_CACHED_BODY).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(key = %key, error = %err, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Only well-formed JSON bodies are cached.
    if serde_json::from_slice::<serde_json::Value>(&bytes).is_ok() {
        if let Ok(body_str) = std::str::from_utf8(&bytes) {
            if let Err(err) = state
                .store
                .set_with_expiry(&key, body_str, state.cache_ttl)
                .await
            {
                warn!(key = %key, error = %err, "cache write failed");
            }
        }
    }

    let mut response = Response::from_parts(parts, Body::from(bytes));
    response
        .headers_mut()
        .insert(HeaderName::from_static("x-cache"), HeaderValue::from_static("MISS"));
    response
}

pub async fn invalidation_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let mut response = next.run(request).await;

    if matches!(method, Method::POST | Method::PUT | Method::DELETE) {
        let pattern = format!("{}:cache:*", state.key_prefix);
        match state.store.delete_by_pattern(&pattern).await {
            Ok(()) => {
                response.headers_mut().insert(
                    HeaderName::from_static("x-cache-invalidated"),
                    HeaderValue::from_static("true"),
                );
            }
            Err(err) => {
                warn!(pattern = %pattern, error = %err, "cache invalidation failed");
            }
        }
    }

    response
}
