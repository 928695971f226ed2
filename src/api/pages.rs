//! Server-rendered user pages.
//!
//! Each request gets its own cache. The page loader fills it, the page is
//! rendered from it, and whatever it holds at the end is embedded in the
//! document for the browser to hydrate from.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::api::server::AppState;
use crate::client::RpcClient;
use crate::db::models::User;
use crate::query::hydration::{HydrationError, payload_script};
use crate::query::{QueryError, dehydrate};
use crate::routes::{LoadError, PageData, RequestContext, user_loading, user_ssr};

#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("failed to render page: {0}")]
    Render(String),
}

impl From<HydrationError> for PageError {
    fn from(err: HydrationError) -> Self {
        PageError::Render(err.to_string())
    }
}

impl From<QueryError> for PageError {
    fn from(err: QueryError) -> Self {
        PageError::Render(err.to_string())
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        match self {
            PageError::Load(e) => e.into_response(),
            PageError::Render(message) => {
                error!(%message, "page render failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error").into_response()
            }
        }
    }
}

pub async fn user_ssr_page(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Html<String>, PageError> {
    let ctx = state.server_context().await;
    let page = user_ssr::load(&ctx, &user_id).await?;
    render(&ctx, page).await
}

pub async fn user_loading_page(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Html<String>, PageError> {
    let ctx = state.server_context().await;
    let page = user_loading::load(&ctx, &user_id).await?;
    render(&ctx, page).await
}

async fn render(ctx: &RequestContext, page: PageData) -> Result<Html<String>, PageError> {
    let user: Option<User> = ctx
        .cache
        .get_query_data(&RpcClient::user_get_key(page.user_id))
        .await?;
    let payload = payload_script(&dehydrate(&ctx.cache).await)?;
    Ok(Html(render_user_page(page, user.as_ref(), &payload)))
}

pub fn render_user_page(page: PageData, user: Option<&User>, payload: &str) -> String {
    let body = match user {
        Some(user) => format!(
            concat!(
                r#"<article class="user" data-user-id="{id}">"#,
                "<h1>{name}</h1>",
                r#"<p class="email">{email}</p>"#,
                r#"<p class="created">Joined <time datetime="{created}">{created_day}</time></p>"#,
                "</article>",
            ),
            id = user.id,
            name = escape_html(&user.name),
            email = escape_html(&user.email),
            created = user.created_at.to_rfc3339(),
            created_day = user.created_at.format("%Y-%m-%d"),
        ),
        None => format!(
            r#"<p class="loading" data-user-id="{}">Loading user…</p>"#,
            page.user_id
        ),
    };

    format!(
        concat!(
            "<!doctype html>\n",
            "<html lang=\"en\">\n",
            "<head><meta charset=\"utf-8\"><title>User {}</title></head>\n",
            "<body>\n<main>{}</main>\n{}\n</body>\n",
            "</html>\n",
        ),
        page.user_id, body, payload
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
