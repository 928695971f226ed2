//! `/userSSR/[userId]`: the user is loaded before the page renders.

use tracing::error;

use crate::routes::{LoadError, PageData, RequestContext, parse_user_id};

/// Validates the id and waits until the user is in the cache, on the server
/// and in the browser alike. A failed fetch is logged and the page renders
/// without data.
pub async fn load(ctx: &RequestContext, user_id: &str) -> Result<PageData, LoadError> {
    let id = parse_user_id(user_id)?;

    if let Err(e) = ctx
        .cache
        .ensure_query_data(&ctx.client.user_get_query_options(id))
        .await
    {
        error!(user_id = id, error = %e, "failed to load user before render");
    }

    Ok(PageData { user_id: id })
}
