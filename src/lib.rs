//! Demo of a typed RPC endpoint feeding a query cache that is prefetched on
//! the server, shipped inside the rendered page and hydrated in the browser.

pub mod api;
pub mod client;
pub mod codec;
pub mod config;
pub mod db;
pub mod query;
pub mod routes;

#[cfg(test)]
pub(crate) mod test_support;
