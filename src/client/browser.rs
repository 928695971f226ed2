//! Browser-side session.
//!
//! A session starts from a server-rendered page: it pulls the embedded
//! payload out of the document, hydrates a fresh cache with it, and only then
//! lets loaders and components read through that cache. Identical keys are
//! therefore served from the payload instead of the network.

use thiserror::Error;
use tracing::warn;

use crate::client::RpcClient;
use crate::client::transport::HttpTransport;
use crate::db::models::User;
use crate::query::QueryCache;
use crate::query::QueryError;
use crate::query::hydration::extract_payload;
use crate::routes::{
    Environment, LoadError, PageData, RequestContext, layout, user_loading, user_ssr,
};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to fetch page: {0}")]
    Network(#[from] reqwest::Error),
    #[error("page request returned {0}")]
    Status(u16),
}

pub struct BrowserSession {
    context: RequestContext,
    document: String,
}

impl BrowserSession {
    /// Loads `path` from `origin` and starts a session on the returned page,
    /// talking to the same origin for any later RPC calls.
    pub async fn visit(origin: &str, path: &str) -> Result<Self, BrowserError> {
        let http = reqwest::Client::new();
        let url = format!("{}/{}", origin.trim_end_matches('/'), path.trim_start_matches('/'));
        let response = http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(BrowserError::Status(response.status().as_u16()));
        }
        let document = response.text().await?;
        let client = RpcClient::new(HttpTransport::with_client(http, origin));
        Ok(Self::boot(document, client).await)
    }

    /// Starts a session on an already fetched page. A malformed payload is
    /// logged and the session starts with an empty cache.
    pub async fn boot(document: String, client: RpcClient) -> Self {
        let payload = extract_payload(&document).unwrap_or_else(|e| {
            warn!(error = %e, "ignoring unreadable hydration payload");
            None
        });
        let cache = layout::load(Environment::Browser, payload.as_ref()).await;
        Self {
            context: RequestContext::new(Environment::Browser, cache, client),
            document,
        }
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn cache(&self) -> &QueryCache {
        &self.context.cache
    }

    pub async fn navigate_ssr(&self, user_id: &str) -> Result<PageData, LoadError> {
        user_ssr::load(&self.context, user_id).await
    }

    pub async fn navigate_loading(&self, user_id: &str) -> Result<PageData, LoadError> {
        user_loading::load(&self.context, user_id).await
    }

    /// What a user component does when it mounts: read the user through the
    /// cache, fetching only if nothing is there yet. Other entries are left
    /// alone.
    pub async fn mount_user(&self, id: u64) -> Result<User, QueryError> {
        let options = self.context.client.user_get_query_options(id);
        let user = self.context.cache.ensure_query_data(&options).await?;
        self.context.cache.on_mount(options.key()).await;
        Ok(user)
    }

    pub async fn window_focused(&self) -> usize {
        self.context.cache.on_window_focus().await
    }

    pub async fn reconnected(&self) -> usize {
        self.context.cache.on_reconnect().await
    }
}
