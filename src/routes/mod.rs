//! Page loaders.
//!
//! Loaders run both during the server render and in the browser session. They
//! receive everything they need through a [`RequestContext`] rather than
//! reaching for process-wide state.

pub mod layout;
pub mod user_loading;
pub mod user_ssr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::RpcClient;
use crate::query::QueryCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Server,
    Browser,
}

impl Environment {
    pub fn is_browser(self) -> bool {
        self == Environment::Browser
    }
}

/// Per-request (server) or per-session (browser) state.
#[derive(Clone)]
pub struct RequestContext {
    pub environment: Environment,
    pub cache: QueryCache,
    pub client: RpcClient,
}

impl RequestContext {
    pub fn new(environment: Environment, cache: QueryCache, client: RpcClient) -> Self {
        Self {
            environment,
            cache,
            client,
        }
    }
}

/// What a user page loader hands to the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    pub user_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("Invalid user ID")]
    InvalidUserId,
}

impl LoadError {
    pub fn status(&self) -> StatusCode {
        match self {
            LoadError::InvalidUserId => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for LoadError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Accepts plain decimal digits only: no sign, no whitespace, no fraction.
pub fn parse_user_id(raw: &str) -> Result<u64, LoadError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LoadError::InvalidUserId);
    }
    raw.parse().map_err(|_| LoadError::InvalidUserId)
}
