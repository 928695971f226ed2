//! Moving cache state from the server render into the browser session.
//!
//! The server dehydrates its request cache into a [`DehydratedState`] and
//! embeds it in the page; the browser extracts it and hydrates a fresh cache
//! before anything reads from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::codec::{self, CodecError};
use crate::query::cache::{QueryCache, QueryStatus};
use crate::query::key::QueryKey;

/// `id` of the `<script>` element carrying the payload.
pub const PAYLOAD_ELEMENT_ID: &str = "__query_state";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HydrationError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("hydration payload element is not terminated")]
    Unterminated,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DehydratedState {
    pub queries: Vec<DehydratedQuery>,
}

impl DehydratedState {
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DehydratedQuery {
    pub query_key: QueryKey,
    pub query_hash: String,
    pub state: DehydratedQueryState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DehydratedQueryState {
    /// Codec output of the query's data.
    pub data: Value,
    pub status: QueryStatus,
    pub data_updated_at: DateTime<Utc>,
}

/// Snapshot of every fresh, successful entry. Pending, failed and stale
/// entries are left out.
pub async fn dehydrate(cache: &QueryCache) -> DehydratedState {
    let mut queries: Vec<DehydratedQuery> = cache
        .fresh_entries()
        .await
        .into_iter()
        .map(|(key, data, data_updated_at)| DehydratedQuery {
            query_hash: key.to_string(),
            query_key: key,
            state: DehydratedQueryState {
                data,
                status: QueryStatus::Success,
                data_updated_at,
            },
        })
        .collect();
    queries.sort_by(|a, b| a.query_hash.cmp(&b.query_hash));
    DehydratedState { queries }
}

/// Seeds `cache` from `state`. Absent or empty state is a no-op, and applying
/// the same state again changes nothing. Returns how many entries were written.
pub async fn hydrate(cache: &QueryCache, state: Option<&DehydratedState>) -> usize {
    let Some(state) = state else {
        return 0;
    };
    let mut restored = 0;
    for query in &state.queries {
        if query.state.status != QueryStatus::Success {
            continue;
        }
        if cache
            .restore(
                query.query_key.clone(),
                query.state.data.clone(),
                query.state.data_updated_at,
            )
            .await
        {
            restored += 1;
        }
    }
    restored
}

/// Renders the `<script>` element that carries `state` inside a page.
pub fn payload_script(state: &DehydratedState) -> Result<String, HydrationError> {
    let json = codec::to_script_safe_string(&codec::encode(state)?)?;
    Ok(format!(
        r#"<script id="{PAYLOAD_ELEMENT_ID}" type="application/json">{json}</script>"#
    ))
}

/// Finds and parses the payload embedded by [`payload_script`].
///
/// A page without the element, or with an empty one, yields `Ok(None)`.
pub fn extract_payload(html: &str) -> Result<Option<DehydratedState>, HydrationError> {
    let open = format!(r#"<script id="{PAYLOAD_ELEMENT_ID}" type="application/json">"#);
    let Some(start) = html.find(&open) else {
        return Ok(None);
    };
    let body = &html[start + open.len()..];
    let end = body.find("</script>").ok_or(HydrationError::Unterminated)?;
    let raw = body[..end].trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let value = codec::from_bytes(raw.as_bytes())?;
    Ok(Some(codec::decode(value)?))
}
