//! Keyed query cache with request deduplication.
//!
//! A cache instance belongs to exactly one server request or one browser
//! session. Every key has at most one fetch in flight: later callers join the
//! shared future of the first one instead of issuing their own request.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::codec;
use crate::query::error::QueryError;
use crate::query::key::QueryKey;

pub type QueryFuture = BoxFuture<'static, Result<Value, QueryError>>;
pub type QueryFn = Arc<dyn Fn() -> QueryFuture + Send + Sync>;
type InFlight = Shared<QueryFuture>;

/// A key plus the function that fetches it, typed by the decoded output.
pub struct QueryOptions<T> {
    key: QueryKey,
    query_fn: QueryFn,
    _output: PhantomData<fn() -> T>,
}

impl<T> QueryOptions<T> {
    pub fn new<F, Fut>(key: QueryKey, query_fn: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, QueryError>> + Send + 'static,
    {
        Self {
            key,
            query_fn: Arc::new(move || query_fn().boxed()),
            _output: PhantomData,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl<T> Clone for QueryOptions<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            query_fn: self.query_fn.clone(),
            _output: PhantomData,
        }
    }
}

impl<T> fmt::Debug for QueryOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Cache-wide defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryClientOptions {
    /// `None` means data never goes stale on its own.
    pub stale_time: Option<Duration>,
    pub refetch_on_mount: bool,
    pub refetch_on_window_focus: bool,
    pub refetch_on_reconnect: bool,
}

impl Default for QueryClientOptions {
    fn default() -> Self {
        Self {
            stale_time: None,
            refetch_on_mount: false,
            refetch_on_window_focus: false,
            refetch_on_reconnect: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub status: QueryStatus,
    pub data: Option<Value>,
    pub error: Option<QueryError>,
    pub data_updated_at: Option<DateTime<Utc>>,
    pub is_fetching: bool,
    pub is_invalidated: bool,
}

impl QueryState {
    fn pending() -> Self {
        Self {
            status: QueryStatus::Pending,
            data: None,
            error: None,
            data_updated_at: None,
            is_fetching: false,
            is_invalidated: false,
        }
    }
}

struct Entry {
    state: QueryState,
    in_flight: Option<(u64, InFlight)>,
    // Hydrated entries have no fetcher until some caller supplies options.
    query_fn: Option<QueryFn>,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: QueryState::pending(),
            in_flight: None,
            query_fn: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<QueryKey, Entry>,
    next_fetch_id: u64,
}

struct CacheState {
    options: QueryClientOptions,
    inner: Mutex<Inner>,
}

impl CacheState {
    fn is_stale(&self, state: &QueryState) -> bool {
        if state.is_invalidated || state.data.is_none() {
            return true;
        }
        match (self.options.stale_time, state.data_updated_at) {
            (Some(stale_time), Some(updated_at)) => {
                let stale_time = TimeDelta::from_std(stale_time).unwrap_or(TimeDelta::MAX);
                Utc::now() - updated_at >= stale_time
            }
            _ => false,
        }
    }

    async fn settle(&self, key: &QueryKey, fetch_id: u64, result: &Result<Value, QueryError>) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.entries.get_mut(key) else {
            return;
        };
        if entry.in_flight.as_ref().map(|(id, _)| *id) != Some(fetch_id) {
            return;
        }

        entry.in_flight = None;
        entry.state.is_fetching = false;
        match result {
            Ok(data) => {
                entry.state.status = QueryStatus::Success;
                entry.state.data = Some(data.clone());
                entry.state.error = None;
                entry.state.data_updated_at = Some(Utc::now());
                entry.state.is_invalidated = false;
                debug!(key = %key, "query fetch succeeded");
            }
            Err(e) => {
                entry.state.status = QueryStatus::Error;
                entry.state.error = Some(e.clone());
                debug!(key = %key, error = %e, "query fetch failed");
            }
        }
    }
}

/// Handle to one cache instance. Clones share the same entries.
#[derive(Clone)]
pub struct QueryCache {
    state: Arc<CacheState>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(QueryClientOptions::default())
    }
}

impl QueryCache {
    pub fn new(options: QueryClientOptions) -> Self {
        Self {
            state: Arc::new(CacheState {
                options,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    pub fn options(&self) -> QueryClientOptions {
        self.state.options
    }

    /// Starts fetching `options` in the background unless fresh data or a
    /// fetch in flight already covers the key. Failures are only recorded in
    /// the entry.
    pub async fn prefetch_query<T>(&self, options: &QueryOptions<T>) {
        let fetch = {
            let mut inner = self.state.inner.lock().await;
            if let Some(entry) = inner.entries.get(&options.key)
                && entry.in_flight.is_none()
                && !self.state.is_stale(&entry.state)
            {
                return;
            }
            self.start_fetch(&mut inner, &options.key, &options.query_fn)
        };
        tokio::spawn(fetch);
    }

    /// Returns cached data if there is any, otherwise joins or starts a fetch
    /// and waits for it.
    pub async fn ensure_query_data<T: DeserializeOwned>(
        &self,
        options: &QueryOptions<T>,
    ) -> Result<T, QueryError> {
        let fetch = {
            let mut inner = self.state.inner.lock().await;
            if let Some(entry) = inner.entries.get_mut(&options.key) {
                if entry.query_fn.is_none() {
                    entry.query_fn = Some(options.query_fn.clone());
                }
                if let Some(data) = &entry.state.data {
                    return Ok(codec::decode(data.clone())?);
                }
            }
            self.start_fetch(&mut inner, &options.key, &options.query_fn)
        };
        Ok(codec::decode(fetch.await?)?)
    }

    /// Like [`QueryCache::ensure_query_data`] but refetches stale data.
    pub async fn fetch_query<T: DeserializeOwned>(
        &self,
        options: &QueryOptions<T>,
    ) -> Result<T, QueryError> {
        let fetch = {
            let mut inner = self.state.inner.lock().await;
            if let Some(entry) = inner.entries.get(&options.key)
                && entry.in_flight.is_none()
                && !self.state.is_stale(&entry.state)
                && let Some(data) = &entry.state.data
            {
                return Ok(codec::decode(data.clone())?);
            }
            self.start_fetch(&mut inner, &options.key, &options.query_fn)
        };
        Ok(codec::decode(fetch.await?)?)
    }

    pub async fn get_query_data<T: DeserializeOwned>(
        &self,
        key: &QueryKey,
    ) -> Result<Option<T>, QueryError> {
        let data = {
            let inner = self.state.inner.lock().await;
            inner.entries.get(key).and_then(|e| e.state.data.clone())
        };
        match data {
            Some(data) => Ok(Some(codec::decode(data)?)),
            None => Ok(None),
        }
    }

    pub async fn get_query_state(&self, key: &QueryKey) -> Option<QueryState> {
        let inner = self.state.inner.lock().await;
        inner.entries.get(key).map(|e| e.state.clone())
    }

    pub async fn len(&self) -> usize {
        self.state.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Marks every entry under `prefix` stale and refetches those that have a
    /// fetcher. Returns how many entries were marked.
    pub async fn invalidate_queries(&self, prefix: &[&str]) -> usize {
        let (marked, fetches) = {
            let mut inner = self.state.inner.lock().await;
            let mut marked = 0;
            let mut refetch = Vec::new();
            for (key, entry) in inner.entries.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
                entry.state.is_invalidated = true;
                marked += 1;
                if let Some(query_fn) = &entry.query_fn {
                    refetch.push((key.clone(), query_fn.clone()));
                }
            }
            let fetches: Vec<InFlight> = refetch
                .into_iter()
                .map(|(key, query_fn)| self.start_fetch(&mut inner, &key, &query_fn))
                .collect();
            (marked, fetches)
        };
        for fetch in fetches {
            tokio::spawn(fetch);
        }
        marked
    }

    /// A component reading `key` has mounted. Refetches that one entry when
    /// refetch on mount is enabled and the entry is stale. Returns whether a
    /// fetch was started.
    pub async fn on_mount(&self, key: &QueryKey) -> bool {
        if !self.state.options.refetch_on_mount {
            return false;
        }
        let fetch = {
            let mut inner = self.state.inner.lock().await;
            let Some(query_fn) = inner
                .entries
                .get(key)
                .filter(|e| e.in_flight.is_none() && self.state.is_stale(&e.state))
                .and_then(|e| e.query_fn.clone())
            else {
                return false;
            };
            self.start_fetch(&mut inner, key, &query_fn)
        };
        tokio::spawn(fetch);
        true
    }

    pub async fn on_window_focus(&self) -> usize {
        self.refetch_stale(self.state.options.refetch_on_window_focus).await
    }

    pub async fn on_reconnect(&self) -> usize {
        self.refetch_stale(self.state.options.refetch_on_reconnect).await
    }

    async fn refetch_stale(&self, enabled: bool) -> usize {
        if !enabled {
            return 0;
        }
        let fetches = {
            let mut inner = self.state.inner.lock().await;
            let stale: Vec<(QueryKey, QueryFn)> = inner
                .entries
                .iter()
                .filter(|(_, e)| e.in_flight.is_none() && self.state.is_stale(&e.state))
                .filter_map(|(k, e)| e.query_fn.clone().map(|f| (k.clone(), f)))
                .collect();
            stale
                .into_iter()
                .map(|(key, query_fn)| self.start_fetch(&mut inner, &key, &query_fn))
                .collect::<Vec<_>>()
        };
        let count = fetches.len();
        for fetch in fetches {
            tokio::spawn(fetch);
        }
        count
    }

    /// Fresh, successfully fetched entries.
    pub(crate) async fn fresh_entries(&self) -> Vec<(QueryKey, Value, DateTime<Utc>)> {
        let inner = self.state.inner.lock().await;
        inner
            .entries
            .iter()
            .filter(|(_, e)| {
                e.state.status == QueryStatus::Success && !self.state.is_stale(&e.state)
            })
            .filter_map(|(k, e)| {
                let data = e.state.data.clone()?;
                let updated_at = e.state.data_updated_at?;
                Some((k.clone(), data, updated_at))
            })
            .collect()
    }

    /// Seeds an entry from outside. Existing data at least as recent wins.
    pub(crate) async fn restore(
        &self,
        key: QueryKey,
        data: Value,
        updated_at: DateTime<Utc>,
    ) -> bool {
        let mut inner = self.state.inner.lock().await;
        let entry = inner.entries.entry(key).or_insert_with(Entry::new);
        if entry.state.data_updated_at.is_some_and(|at| at >= updated_at) {
            return false;
        }
        entry.state.status = QueryStatus::Success;
        entry.state.data = Some(data);
        entry.state.error = None;
        entry.state.data_updated_at = Some(updated_at);
        entry.state.is_invalidated = false;
        true
    }

    fn start_fetch(&self, inner: &mut Inner, key: &QueryKey, query_fn: &QueryFn) -> InFlight {
        if let Some((_, fetch)) = inner.entries.get(key).and_then(|e| e.in_flight.as_ref()) {
            return fetch.clone();
        }

        inner.next_fetch_id += 1;
        let fetch_id = inner.next_fetch_id;
        let request = query_fn();
        let cache: Weak<CacheState> = Arc::downgrade(&self.state);
        let settle_key = key.clone();
        let fetch = async move {
            let result = request.await;
            if let Some(cache) = cache.upgrade() {
                cache.settle(&settle_key, fetch_id, &result).await;
            }
            result
        }
        .boxed()
        .shared();

        let entry = inner.entries.entry(key.clone()).or_insert_with(Entry::new);
        entry.query_fn = Some(query_fn.clone());
        entry.in_flight = Some((fetch_id, fetch.clone()));
        entry.state.is_fetching = true;
        debug!(key = %key, fetch_id, "query fetch started");
        fetch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::client::transport::TransportError;

    fn counted(id: u64, calls: Arc<AtomicUsize>, delay: Duration) -> QueryOptions<u64> {
        QueryOptions::new(QueryKey::new("num/get", json!({ "id": id })), move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok::<_, QueryError>(json!(id))
            }
        })
    }

    fn failing(calls: Arc<AtomicUsize>) -> QueryOptions<u64> {
        QueryOptions::new(QueryKey::new("num/get", json!({ "id": 0 })), move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Value, _>(QueryError::from(TransportError::Network(
                    "connection refused".to_string(),
                )))
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_fetch() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = counted(1, calls.clone(), Duration::from_millis(200));

        let (a, b) = tokio::join!(
            cache.ensure_query_data(&options),
            cache.ensure_query_data(&options)
        );

        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn prefetch_returns_before_the_fetch_completes() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = counted(2, calls.clone(), Duration::from_secs(1));
        let started = tokio::time::Instant::now();

        cache.prefetch_query(&options).await;
        assert_eq!(started.elapsed(), Duration::ZERO);

        let state = cache.get_query_state(options.key()).await.unwrap();
        assert_eq!(state.status, QueryStatus::Pending);
        assert!(state.is_fetching);

        assert_eq!(cache.ensure_query_data(&options).await.unwrap(), 2);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_data_is_not_refetched() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = counted(3, calls.clone(), Duration::from_millis(10));

        cache.ensure_query_data(&options).await.unwrap();
        cache.ensure_query_data(&options).await.unwrap();
        cache.fetch_query(&options).await.unwrap();
        cache.prefetch_query(&options).await;
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let state = cache.get_query_state(options.key()).await.unwrap();
        assert_eq!(state.status, QueryStatus::Success);
        assert!(!state.is_fetching);
    }

    #[tokio::test]
    async fn failures_are_recorded_and_not_retried() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = failing(calls.clone());

        let err = cache.ensure_query_data(&options).await.unwrap_err();
        assert!(matches!(err, QueryError::Transport(TransportError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let state = cache.get_query_state(options.key()).await.unwrap();
        assert_eq!(state.status, QueryStatus::Error);
        assert!(state.data.is_none());

        // A later explicit load starts over.
        cache.ensure_query_data(&options).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn default_options_never_refetch_on_triggers() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = counted(4, calls.clone(), Duration::from_millis(10));
        cache.ensure_query_data(&options).await.unwrap();

        assert!(!cache.on_mount(options.key()).await);
        assert_eq!(cache.on_window_focus().await, 0);
        assert_eq!(cache.on_reconnect().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn enabled_trigger_refetches_stale_entries() {
        let cache = QueryCache::new(QueryClientOptions {
            stale_time: Some(Duration::ZERO),
            refetch_on_window_focus: true,
            ..QueryClientOptions::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let options = counted(5, calls.clone(), Duration::from_millis(10));
        cache.ensure_query_data(&options).await.unwrap();

        assert_eq!(cache.on_window_focus().await, 1);
        assert_eq!(cache.on_reconnect().await, 0);
        assert_eq!(cache.fetch_query(&options).await.unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn mount_refetches_only_the_mounted_key() {
        let cache = QueryCache::new(QueryClientOptions {
            stale_time: Some(Duration::ZERO),
            refetch_on_mount: true,
            ..QueryClientOptions::default()
        });
        let mounted_calls = Arc::new(AtomicUsize::new(0));
        let other_calls = Arc::new(AtomicUsize::new(0));
        let mounted = counted(7, mounted_calls.clone(), Duration::from_millis(10));
        let other = counted(8, other_calls.clone(), Duration::from_millis(10));
        cache.ensure_query_data(&mounted).await.unwrap();
        cache.ensure_query_data(&other).await.unwrap();

        assert!(cache.on_mount(mounted.key()).await);
        assert!(!cache.on_mount(&QueryKey::new("num/get", json!({ "id": 99 }))).await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(mounted_calls.load(Ordering::SeqCst), 2);
        assert_eq!(other_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_refetches_matching_keys_only() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let num = counted(6, calls.clone(), Duration::from_millis(10));
        let other = QueryOptions::<u64>::new(QueryKey::new("other/get", json!(null)), || async {
            Ok::<_, QueryError>(json!(0))
        });
        cache.ensure_query_data(&num).await.unwrap();
        cache.ensure_query_data(&other).await.unwrap();

        assert_eq!(cache.invalidate_queries(&["num"]).await, 1);
        assert!(cache.get_query_state(num.key()).await.unwrap().is_invalidated);

        assert_eq!(cache.fetch_query(&num).await.unwrap(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.get_query_state(num.key()).await.unwrap().is_invalidated);
        assert!(!cache.get_query_state(other.key()).await.unwrap().is_invalidated);
    }

    #[tokio::test]
    async fn restore_keeps_newer_data() {
        let cache = QueryCache::default();
        let key = QueryKey::new("num/get", json!({ "id": 9 }));
        let older = Utc::now() - TimeDelta::seconds(60);
        let newer = Utc::now();

        assert!(cache.restore(key.clone(), json!(2), newer).await);
        assert!(!cache.restore(key.clone(), json!(1), older).await);
        assert!(!cache.restore(key.clone(), json!(1), newer).await);
        assert_eq!(cache.get_query_data::<u64>(&key).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn typed_read_of_wrong_shape_fails() {
        let cache = QueryCache::default();
        let key = QueryKey::new("num/get", json!({ "id": 10 }));
        cache.restore(key.clone(), json!("text"), Utc::now()).await;
        assert!(matches!(
            cache.get_query_data::<u64>(&key).await,
            Err(QueryError::Codec(_))
        ));
    }
}
