//! `/userLoading/[userId]`: render at once, load in the browser.

use crate::routes::{LoadError, PageData, RequestContext, parse_user_id};

/// Validates the id and, in the browser only, starts fetching the user
/// without waiting for it. On the server this does no fetching at all; the
/// page renders its loading state and the browser picks the work up.
pub async fn load(ctx: &RequestContext, user_id: &str) -> Result<PageData, LoadError> {
    let id = parse_user_id(user_id)?;

    if ctx.environment.is_browser() {
        ctx.cache
            .prefetch_query(&ctx.client.user_get_query_options(id))
            .await;
    }

    Ok(PageData { user_id: id })
}
