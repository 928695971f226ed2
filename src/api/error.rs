//! RPC failures and their HTTP representation.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::api::wire::RpcErrorBody;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("input validation failed: {}", issues.join("; "))]
    Validation { issues: Vec<String> },
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("no procedure at '{0}'")]
    NotFound(String),
    #[error("missing or invalid CSRF token")]
    CsrfRejected,
    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    pub fn status(&self) -> StatusCode {
        match self {
            RpcError::Validation { .. } | RpcError::Malformed(_) => StatusCode::BAD_REQUEST,
            RpcError::NotFound(_) => StatusCode::NOT_FOUND,
            RpcError::CsrfRejected => StatusCode::FORBIDDEN,
            RpcError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            RpcError::Validation { .. } | RpcError::Malformed(_) => "BAD_REQUEST",
            RpcError::NotFound(_) => "NOT_FOUND",
            RpcError::CsrfRejected => "CSRF_TOKEN_MISMATCH",
            RpcError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn body(&self) -> RpcErrorBody {
        let (message, issues) = match self {
            RpcError::Validation { issues } => {
                ("Input validation failed".to_string(), issues.clone())
            }
            RpcError::Internal(_) => ("Internal server error".to_string(), Vec::new()),
            other => (other.to_string(), Vec::new()),
        };
        RpcErrorBody {
            code: self.code().to_string(),
            status: self.status().as_u16(),
            message,
            issues,
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
