//! Procedure dispatch for `/rpc/...`.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::api::error::RpcError;
use crate::api::server::AppState;
use crate::api::wire::{BATCH_PATH, BatchCall, BatchResult, USER_GET, UserGetInput};
use crate::codec;
use crate::db::repo::UserRepository;

/// Routes procedure calls to their handlers.
pub struct RpcRouter {
    users: Arc<dyn UserRepository>,
}

impl RpcRouter {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    pub async fn dispatch(&self, path: &str, input: Value) -> Result<Value, RpcError> {
        match path.trim_matches('/') {
            USER_GET => {
                let input = validate_user_get(&input)?;
                let user = self.get_user(input).await;
                codec::encode(&user).map_err(|e| RpcError::Internal(e.to_string()))
            }
            other => Err(RpcError::NotFound(other.to_string())),
        }
    }

    /// Runs every call concurrently; one failing call does not affect the others.
    pub async fn dispatch_batch(&self, calls: Vec<BatchCall>) -> Vec<BatchResult> {
        let pending = calls.into_iter().enumerate().map(|(index, call)| async move {
            match self.dispatch(&call.path, call.input).await {
                Ok(body) => BatchResult {
                    index,
                    status: StatusCode::OK.as_u16(),
                    body,
                },
                Err(e) => BatchResult {
                    index,
                    status: e.status().as_u16(),
                    body: serde_json::to_value(e.body()).unwrap_or(Value::Null),
                },
            }
        });
        join_all(pending).await
    }

    async fn get_user(&self, input: UserGetInput) -> crate::db::models::User {
        info!(user_id = input.id, "get user called");
        self.users.get_user(input.id).await
    }
}

/// Largest integer a JSON number carries without loss (2^53 - 1).
pub const MAX_SAFE_ID: u64 = (1 << 53) - 1;

/// Accepts `{ "id": n }` where `n` is a whole JSON number in
/// `0..=MAX_SAFE_ID`. `42.0` counts as whole.
pub fn validate_user_get(input: &Value) -> Result<UserGetInput, RpcError> {
    let Some(id) = input.get("id") else {
        return Err(RpcError::Validation {
            issues: vec!["id: required".to_string()],
        });
    };
    match whole_number(id) {
        Some(n) if n <= MAX_SAFE_ID => Ok(UserGetInput { id: n }),
        _ => Err(RpcError::Validation {
            issues: vec![format!("id: expected a non-negative safe integer, got {id}")],
        }),
    }
}

fn whole_number(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f >= 0.0 && f.fract() == 0.0 && f <= MAX_SAFE_ID as f64 {
        return Some(f as u64);
    }
    None
}

#[derive(Debug, Default, Deserialize)]
pub struct RpcQuery {
    data: Option<String>,
}

/// Single entry point for every verb under `/rpc/`.
///
/// Input travels in the request body when there is one and otherwise in the
/// `data` query parameter, which is how GET calls carry it.
pub async fn rpc_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(rest): Path<String>,
    Query(query): Query<RpcQuery>,
    body: Bytes,
) -> Response {
    if rest.trim_matches('/') == BATCH_PATH {
        return match batch_calls(&body) {
            Ok(calls) => Json(state.rpc.dispatch_batch(calls).await).into_response(),
            Err(e) => e.into_response(),
        };
    }

    let input = match request_input(&body, query.data.as_deref()) {
        Ok(input) => input,
        Err(e) => return e.into_response(),
    };

    tracing::debug!(%method, path = %rest, "dispatching rpc call");
    match state.rpc.dispatch(&rest, input).await {
        Ok(output) => Json(output).into_response(),
        Err(e) => e.into_response(),
    }
}

fn request_input(body: &[u8], data: Option<&str>) -> Result<Value, RpcError> {
    if !body.is_empty() {
        return codec::from_bytes(body).map_err(|e| RpcError::Malformed(e.to_string()));
    }
    match data {
        Some(raw) => {
            codec::from_bytes(raw.as_bytes()).map_err(|e| RpcError::Malformed(e.to_string()))
        }
        None => Ok(Value::Null),
    }
}

fn batch_calls(body: &[u8]) -> Result<Vec<BatchCall>, RpcError> {
    let value = codec::from_bytes(body).map_err(|e| RpcError::Malformed(e.to_string()))?;
    codec::decode(value).map_err(|e| RpcError::Malformed(e.to_string()))
}
