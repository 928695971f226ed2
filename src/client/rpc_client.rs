use std::sync::Arc;

use serde_json::{Value, json};

use crate::api::wire::{BatchCall, USER_GET};
use crate::client::transport::{RpcTransport, TransportError};
use crate::codec;
use crate::db::models::User;
use crate::query::{QueryError, QueryKey, QueryOptions};

/// Typed front for a transport, plus query options for the cache.
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
}

impl RpcClient {
    pub fn new(transport: impl RpcTransport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn from_transport(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    pub async fn get_user(&self, id: u64) -> Result<User, TransportError> {
        let output = self.transport.call(USER_GET, user_get_input(id)).await?;
        Ok(codec::decode(output)?)
    }

    /// Fetches several users in one batched exchange.
    pub async fn get_users(
        &self,
        ids: &[u64],
    ) -> Result<Vec<Result<User, TransportError>>, TransportError> {
        let calls = ids
            .iter()
            .map(|&id| BatchCall {
                path: USER_GET.to_string(),
                input: user_get_input(id),
            })
            .collect();
        let results = self.transport.call_batch(calls).await?;
        Ok(results
            .into_iter()
            .map(|r| r.and_then(|v| codec::decode(v).map_err(TransportError::from)))
            .collect())
    }

    pub fn user_get_key(id: u64) -> QueryKey {
        QueryKey::new(USER_GET, user_get_input(id))
    }

    pub fn user_get_query_options(&self, id: u64) -> QueryOptions<User> {
        let transport = self.transport.clone();
        QueryOptions::new(Self::user_get_key(id), move || {
            let transport = transport.clone();
            async move {
                transport
                    .call(USER_GET, user_get_input(id))
                    .await
                    .map_err(QueryError::from)
            }
        })
    }
}

fn user_get_input(id: u64) -> Value {
    json!({ "id": id })
}
