//! How RPC calls reach the server.
//!
//! The browser session talks HTTP through [`HttpTransport`], which batches
//! calls made together; the server render calls the router in-process through
//! [`LocalTransport`]. Both encode values with the same codec, so callers
//! cannot tell them apart.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, oneshot};
use tracing::debug;

use crate::api::error::RpcError;
use crate::api::rpc::RpcRouter;
use crate::api::wire::{
    BATCH_PATH, BatchCall, BatchResult, CSRF_HEADER, CSRF_TOKEN, RpcErrorBody,
};
use crate::codec::{self, CodecError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rpc call rejected with {status} {code}: {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl TransportError {
    /// HTTP status of a rejected call.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn from_body(body: RpcErrorBody) -> Self {
        TransportError::Rejected {
            status: body.status,
            code: body.code,
            message: body.message,
        }
    }
}

impl From<RpcError> for TransportError {
    fn from(err: RpcError) -> Self {
        Self::from_body(err.body())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}

#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, path: &str, input: Value) -> Result<Value, TransportError>;

    /// Issues several calls at once. The outer error covers the exchange as a
    /// whole; each call still succeeds or fails on its own.
    async fn call_batch(
        &self,
        calls: Vec<BatchCall>,
    ) -> Result<Vec<Result<Value, TransportError>>, TransportError> {
        let pending = calls
            .into_iter()
            .map(|call| async move { self.call(&call.path, call.input).await });
        Ok(join_all(pending).await)
    }
}

/// Calls `{origin}/rpc/...` over HTTP.
///
/// Calls issued in the same scheduling window are queued and go out together
/// as one `POST /rpc/__batch__`. A window holding a single call is sent as a
/// plain GET with the input in the `data` query parameter.
#[derive(Clone)]
pub struct HttpTransport {
    inner: Arc<HttpInner>,
}

struct HttpInner {
    http: reqwest::Client,
    base_url: String,
    queue: Mutex<Vec<QueuedCall>>,
}

struct QueuedCall {
    call: BatchCall,
    reply: oneshot::Sender<Result<Value, TransportError>>,
}

impl HttpTransport {
    pub fn new(origin: &str) -> Self {
        Self::with_client(reqwest::Client::new(), origin)
    }

    pub fn with_client(http: reqwest::Client, origin: &str) -> Self {
        Self {
            inner: Arc::new(HttpInner {
                http,
                base_url: format!("{}/rpc", origin.trim_end_matches('/')),
                queue: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.inner.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpInner {
    /// Sends whatever has queued up since the first call of the window.
    async fn flush(&self) {
        tokio::task::yield_now().await;
        let queued = std::mem::take(&mut *self.queue.lock().await);
        if queued.len() <= 1 {
            for QueuedCall { call, reply } in queued {
                let _ = reply.send(self.get(call).await);
            }
            return;
        }

        debug!(calls = queued.len(), "sending batched rpc calls");
        let (calls, replies): (Vec<_>, Vec<_>) =
            queued.into_iter().map(|q| (q.call, q.reply)).unzip();
        match self.post_batch(calls).await {
            Ok(results) => {
                for (reply, result) in replies.into_iter().zip(results) {
                    let _ = reply.send(result);
                }
            }
            Err(e) => {
                for reply in replies {
                    let _ = reply.send(Err(e.clone()));
                }
            }
        }
    }

    async fn get(&self, call: BatchCall) -> Result<Value, TransportError> {
        let data = codec::to_text(&call.input)?;
        let response = self
            .http
            .get(format!("{}/{}", self.base_url, call.path.trim_matches('/')))
            .header(CSRF_HEADER, CSRF_TOKEN)
            .query(&[("data", data)])
            .send()
            .await?;
        read_response(response).await
    }

    async fn post_batch(
        &self,
        calls: Vec<BatchCall>,
    ) -> Result<Vec<Result<Value, TransportError>>, TransportError> {
        let body = codec::to_bytes(&codec::encode(&calls)?)?;
        let response = self
            .http
            .post(format!("{}/{BATCH_PATH}", self.base_url))
            .header(CSRF_HEADER, CSRF_TOKEN)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let mut results: Vec<BatchResult> = codec::decode(read_response(response).await?)?;
        results.sort_by_key(|r| r.index);
        Ok(results.into_iter().map(batch_outcome).collect())
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, path: &str, input: Value) -> Result<Value, TransportError> {
        let (reply, response) = oneshot::channel();
        let opens_window = {
            let mut queue = self.inner.queue.lock().await;
            queue.push(QueuedCall {
                call: BatchCall {
                    path: path.trim_matches('/').to_string(),
                    input,
                },
                reply,
            });
            queue.len() == 1
        };
        if opens_window {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.flush().await });
        }
        match response.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Network(
                "batch ended without answering the call".to_string(),
            )),
        }
    }

    async fn call_batch(
        &self,
        calls: Vec<BatchCall>,
    ) -> Result<Vec<Result<Value, TransportError>>, TransportError> {
        self.inner.post_batch(calls).await
    }
}

/// Dispatches straight into the router, round-tripping inputs and outputs
/// through the wire encoding.
#[derive(Clone)]
pub struct LocalTransport {
    router: Arc<RpcRouter>,
}

impl LocalTransport {
    pub fn new(router: Arc<RpcRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl RpcTransport for LocalTransport {
    async fn call(&self, path: &str, input: Value) -> Result<Value, TransportError> {
        let input = codec::from_bytes(&codec::to_bytes(&input)?)?;
        let output = self.router.dispatch(path, input).await?;
        Ok(codec::from_bytes(&codec::to_bytes(&output)?)?)
    }

    async fn call_batch(
        &self,
        calls: Vec<BatchCall>,
    ) -> Result<Vec<Result<Value, TransportError>>, TransportError> {
        let results = self.router.dispatch_batch(calls).await;
        Ok(results.into_iter().map(batch_outcome).collect())
    }
}

async fn read_response(response: reqwest::Response) -> Result<Value, TransportError> {
    let status = response.status();
    let bytes = response.bytes().await?;
    if status.is_success() {
        return Ok(codec::from_bytes(&bytes)?);
    }
    Err(rejection(status.as_u16(), &bytes))
}

fn rejection(status: u16, bytes: &[u8]) -> TransportError {
    match codec::from_bytes(bytes).and_then(codec::decode::<RpcErrorBody>) {
        Ok(body) => TransportError::from_body(body),
        Err(_) => TransportError::Rejected {
            status,
            code: "UNKNOWN".to_string(),
            message: String::from_utf8_lossy(bytes).into_owned(),
        },
    }
}

fn batch_outcome(result: BatchResult) -> Result<Value, TransportError> {
    if (200..300).contains(&result.status) {
        return Ok(result.body);
    }
    match codec::decode::<RpcErrorBody>(result.body) {
        Ok(body) => Err(TransportError::from_body(body)),
        Err(e) => Err(e.into()),
    }
}
