//! Fakes shared by unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::api::rpc::RpcRouter;
use crate::client::RpcClient;
use crate::client::transport::{LocalTransport, RpcTransport, TransportError};
use crate::db::repo::SimulatedUserRepository;

/// Counts calls before forwarding them.
pub struct CountingTransport<T> {
    inner: T,
    calls: Arc<AtomicUsize>,
}

impl<T> CountingTransport<T> {
    pub fn new(inner: T) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl<T: RpcTransport> RpcTransport for CountingTransport<T> {
    async fn call(&self, path: &str, input: Value) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.call(path, input).await
    }
}

/// Every call fails as if the server were unreachable.
pub struct UnreachableTransport;

#[async_trait]
impl RpcTransport for UnreachableTransport {
    async fn call(&self, _path: &str, _input: Value) -> Result<Value, TransportError> {
        Err(TransportError::Network("connection refused".to_string()))
    }
}

/// In-process client over a simulated repository with the given delay, plus
/// a counter of transport calls.
pub fn counting_local_client(
    delay_ms: std::ops::RangeInclusive<u64>,
) -> (RpcClient, Arc<AtomicUsize>) {
    let repo = Arc::new(SimulatedUserRepository::new(delay_ms));
    let router = Arc::new(RpcRouter::new(repo));
    let (transport, calls) = CountingTransport::new(LocalTransport::new(router));
    (RpcClient::new(transport), calls)
}
