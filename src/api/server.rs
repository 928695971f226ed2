use std::sync::Arc;

use axum::http::StatusCode;
use axum::{
    Router, middleware,
    routing::{any, get},
};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::csrf::require_csrf_token;
use crate::api::pages;
use crate::api::rpc::{RpcRouter, rpc_handler};
use crate::client::RpcClient;
use crate::client::transport::LocalTransport;
use crate::config::Config;
use crate::db::repo::{SimulatedUserRepository, UserRepository};
use crate::routes::{Environment, RequestContext, layout};

pub struct AppState {
    pub rpc: Arc<RpcRouter>,
}

impl AppState {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self {
            rpc: Arc::new(RpcRouter::new(users)),
        }
    }

    /// Fresh context for one server render. The cache lives and dies with the
    /// request, and calls go straight to the router.
    pub async fn server_context(&self) -> RequestContext {
        let cache = layout::load(Environment::Server, None).await;
        let client = RpcClient::new(LocalTransport::new(self.rpc.clone()));
        RequestContext::new(Environment::Server, cache, client)
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
    #[error("server failed: {0}")]
    Serve(#[from] std::io::Error),
}

pub fn app(state: Arc<AppState>) -> Router {
    let rpc = Router::new()
        .route("/rpc/{*rest}", any(rpc_handler))
        .route_layer(middleware::from_fn(require_csrf_token));

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/userSSR/{user_id}", get(pages::user_ssr_page))
        .route("/userLoading/{user_id}", get(pages::user_loading_page))
        .merge(rpc)
        .fallback(|| async { (StatusCode::NOT_FOUND, "Not Found") })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(config: Config) -> Result<(), ServerError> {
    let users = Arc::new(SimulatedUserRepository::new(config.delay_ms.clone()));
    let state = Arc::new(AppState::new(users));

    let listener = TcpListener::bind(config.bind)
        .await
        .map_err(|source| ServerError::Bind {
            addr: config.bind,
            source,
        })?;

    info!(
        addr = %config.bind,
        delay_min_ms = *config.delay_ms.start(),
        delay_max_ms = *config.delay_ms.end(),
        "server listening"
    );

    axum::serve(listener, app(state)).await?;
    Ok(())
}
