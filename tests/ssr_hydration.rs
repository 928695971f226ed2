use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::extract::Request;
use axum::middleware::{self, Next};
use futures_util::future::join_all;
use rstest::rstest;
use tokio::net::TcpListener;

use user_query_demo::api::server::{AppState, app};
use user_query_demo::client::browser::BrowserError;
use user_query_demo::client::transport::HttpTransport;
use user_query_demo::client::{BrowserSession, RpcClient};
use user_query_demo::db::models::User;
use user_query_demo::db::repo::{UserRepository, fabricate_user};
use user_query_demo::query::{QueryCache, QueryStatus};

#[derive(Default)]
struct CountingRepository {
    lookups: AtomicUsize,
}

#[async_trait]
impl UserRepository for CountingRepository {
    async fn get_user(&self, id: u64) -> User {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        fabricate_user(id)
    }
}

struct TestServer {
    origin: String,
    repo: Arc<CountingRepository>,
    rpc_requests: Arc<AtomicUsize>,
}

impl TestServer {
    fn lookups(&self) -> usize {
        self.repo.lookups.load(Ordering::SeqCst)
    }

    fn rpc_requests(&self) -> usize {
        self.rpc_requests.load(Ordering::SeqCst)
    }
}

async fn spawn_server() -> TestServer {
    let repo = Arc::new(CountingRepository::default());
    let rpc_requests = Arc::new(AtomicUsize::new(0));
    let state = Arc::new(AppState::new(repo.clone()));

    let counter = rpc_requests.clone();
    let router = app(state).layer(middleware::from_fn(move |req: Request, next: Next| {
        if req.uri().path().starts_with("/rpc/") {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        next.run(req)
    }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    TestServer {
        origin: format!("http://{addr}"),
        repo,
        rpc_requests,
    }
}

#[tokio::test]
async fn ssr_page_hydrates_the_browser_without_refetching() {
    let server = spawn_server().await;

    let session = BrowserSession::visit(&server.origin, "/userSSR/42").await.unwrap();
    assert_eq!(server.lookups(), 1);

    let state = session
        .cache()
        .get_query_state(&RpcClient::user_get_key(42))
        .await
        .unwrap();
    assert_eq!(state.status, QueryStatus::Success);

    assert_eq!(session.navigate_ssr("42").await.unwrap().user_id, 42);
    let user = session.mount_user(42).await.unwrap();
    assert_eq!(user, fabricate_user(42));
    assert_eq!(server.lookups(), 1);
}

#[tokio::test]
async fn loading_page_defers_the_fetch_to_the_browser() {
    let server = spawn_server().await;

    let session = BrowserSession::visit(&server.origin, "/userLoading/5").await.unwrap();
    assert!(session.document().contains("Loading user"));
    assert!(session.cache().is_empty().await);
    assert_eq!(server.lookups(), 0);

    session.navigate_loading("5").await.unwrap();
    assert_eq!(session.mount_user(5).await.unwrap(), fabricate_user(5));
    assert_eq!(session.mount_user(5).await.unwrap(), fabricate_user(5));
    assert_eq!(server.lookups(), 1);
}

#[rstest]
#[case::ssr("/userSSR/abc")]
#[case::loading("/userLoading/-1")]
#[tokio::test]
async fn invalid_route_parameter_is_a_bad_request(#[case] path: &str) {
    let server = spawn_server().await;

    match BrowserSession::visit(&server.origin, path).await {
        Err(BrowserError::Status(status)) => assert_eq!(status, 400),
        Err(e) => panic!("unexpected error for {path}: {e}"),
        Ok(_) => panic!("{path} should have been rejected"),
    }
    assert_eq!(server.lookups(), 0);
}

#[tokio::test]
async fn http_client_calls_and_batches() {
    let server = spawn_server().await;
    let client = RpcClient::new(HttpTransport::new(&server.origin));

    assert_eq!(client.get_user(7).await.unwrap(), fabricate_user(7));

    let users = client.get_users(&[1, 2]).await.unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].as_ref().unwrap(), &fabricate_user(1));
    assert_eq!(users[1].as_ref().unwrap(), &fabricate_user(2));
    assert_eq!(server.lookups(), 3);
}

#[tokio::test]
async fn forged_post_is_rejected() {
    let server = spawn_server().await;

    let response = reqwest::Client::new()
        .post(format!("{}/rpc/user/get", server.origin))
        .header("content-type", "application/json")
        .body(r#"{"id":1}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 403);
    assert_eq!(server.lookups(), 0);
}

#[tokio::test]
async fn validation_errors_reach_the_client() {
    let server = spawn_server().await;

    let response = reqwest::Client::new()
        .get(format!("{}/rpc/user/get", server.origin))
        .query(&[("data", r#"{"id":-1}"#)])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Input validation failed");
    assert_eq!(server.lookups(), 0);
}

#[tokio::test]
async fn concurrent_queries_share_one_request() {
    let server = spawn_server().await;
    let client = RpcClient::new(HttpTransport::new(&server.origin));
    let cache = QueryCache::default();

    let options: Vec<_> = [1, 2, 3]
        .into_iter()
        .map(|id| client.user_get_query_options(id))
        .collect();
    let users = join_all(options.iter().map(|o| cache.ensure_query_data(o))).await;

    for (id, user) in [1, 2, 3].into_iter().zip(users) {
        assert_eq!(user.unwrap(), fabricate_user(id));
    }
    assert_eq!(server.rpc_requests(), 1);
    assert_eq!(server.lookups(), 3);
}

#[tokio::test]
async fn lone_query_goes_out_as_a_plain_get() {
    let server = spawn_server().await;
    let client = RpcClient::new(HttpTransport::new(&server.origin));

    assert_eq!(client.get_user(9).await.unwrap(), fabricate_user(9));
    assert_eq!(client.get_user(10).await.unwrap(), fabricate_user(10));
    assert_eq!(server.rpc_requests(), 2);
}
