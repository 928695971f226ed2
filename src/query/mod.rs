//! Client-side query cache and the hydration bridge that seeds it.

pub mod cache;
pub mod error;
pub mod hydration;
pub mod key;

pub use cache::{QueryCache, QueryClientOptions, QueryOptions, QueryState, QueryStatus};
pub use error::QueryError;
pub use hydration::{DehydratedState, dehydrate, hydrate};
pub use key::QueryKey;
