//! Calling the RPC surface from the browser session or the server render.

pub mod browser;
pub mod rpc_client;
pub mod transport;

pub use browser::BrowserSession;
pub use rpc_client::RpcClient;
