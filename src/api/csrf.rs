//! CSRF guard for the RPC routes.
//!
//! Browsers cannot attach a custom header to a cross-site request without a
//! CORS preflight, and the server never grants one, so requiring the header on
//! state-changing verbs is enough to reject forged submissions.

use axum::extract::Request;
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::api::error::RpcError;
use crate::api::wire::{CSRF_HEADER, CSRF_TOKEN};

pub async fn require_csrf_token(request: Request, next: Next) -> Response {
    if is_safe_method(request.method()) || has_token(request.headers()) {
        return next.run(request).await;
    }

    warn!(
        method = %request.method(),
        path = %request.uri().path(),
        "rejecting rpc request without csrf token"
    );
    RpcError::CsrfRejected.into_response()
}

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn has_token(headers: &HeaderMap) -> bool {
    headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == CSRF_TOKEN)
}
