//! Types shared by both ends of the RPC link.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Procedure path of `user.get`.
pub const USER_GET: &str = "user/get";

/// Reserved procedure path that carries a batch of calls.
pub const BATCH_PATH: &str = "__batch__";

/// Header carrying the CSRF proof.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Value the CSRF header must hold.
pub const CSRF_TOKEN: &str = "orpc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGetInput {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCall {
    pub path: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub index: usize,
    pub status: u16,
    pub body: Value,
}

/// Body of every non-2xx RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: String,
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}
