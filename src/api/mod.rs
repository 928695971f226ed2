pub mod csrf;
pub mod error;
pub mod pages;
pub mod rpc;
pub mod server;
pub mod wire;
