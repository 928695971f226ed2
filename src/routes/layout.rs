use tracing::info;

use crate::query::{DehydratedState, QueryCache, QueryClientOptions, hydrate};
use crate::routes::Environment;

/// Builds the cache every page below the layout shares.
///
/// Data never goes stale on its own and nothing refetches on mount, focus or
/// reconnect. In the browser the cache is seeded from the server payload
/// before any page loader runs.
pub async fn load(environment: Environment, payload: Option<&DehydratedState>) -> QueryCache {
    let cache = QueryCache::new(QueryClientOptions::default());
    if environment.is_browser() {
        let restored = hydrate(&cache, payload).await;
        info!(restored, "hydrated query cache");
    }
    cache
}
