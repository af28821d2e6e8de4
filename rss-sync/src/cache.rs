//! Keyed read-through cache with stale-while-revalidate semantics.
//!
//! Entries are addressed by a [`QueryKey`] (resource type plus normalized
//! parameters). Concurrent reads of one key share a single in-flight fetch;
//! invalidation only flips freshness and never drops data that is on screen.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ErrorKind, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Articles,
    ArticleDetail,
    ArticleSummary,
    Digests,
    Feeds,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Articles => "articles",
            ResourceType::ArticleDetail => "article",
            ResourceType::ArticleSummary => "article-summary",
            ResourceType::Digests => "digests",
            ResourceType::Feeds => "feeds",
        }
    }
}

/// Canonical cache address. Parameters live in a sorted map so insertion
/// order never changes the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    resource: ResourceType,
    params: BTreeMap<String, String>,
}

impl QueryKey {
    pub fn new(resource: ResourceType) -> Self {
        Self {
            resource,
            params: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl ToString) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn resource(&self) -> ResourceType {
        self.resource
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource.as_str())?;
        let mut sep = '?';
        for (name, value) in &self.params {
            write!(f, "{sep}{name}={value}")?;
            sep = '&';
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    pub stale_time: Duration,
    pub placeholder_previous: bool,
    pub retry: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(30),
            placeholder_previous: false,
            retry: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub is_placeholder: bool,
    pub error: Option<SyncError>,
}

impl<T> QueryResult<T> {
    fn ready(data: Option<T>) -> Self {
        Self {
            data,
            is_loading: false,
            is_placeholder: false,
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Observable bookkeeping for one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryState {
    pub has_data: bool,
    pub is_stale: bool,
    pub is_fetching: bool,
    pub fetched_at: Option<Instant>,
    pub last_error: Option<SyncError>,
}

type Payload = Arc<dyn Any + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, Result<Payload, SyncError>>>;

#[derive(Default)]
struct CacheEntry {
    data: Option<Payload>,
    fetched_at: Option<Instant>,
    stale: bool,
    // bumped on every invalidation of this entry
    epoch: u64,
    in_flight: Option<(u64, SharedFetch)>,
    // id of the fetch whose data is currently stored
    stored_fetch: u64,
    last_error: Option<SyncError>,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant, stale_time: Duration) -> bool {
        match (&self.data, self.fetched_at) {
            (Some(_), Some(at)) => !self.stale && now.saturating_duration_since(at) < stale_time,
            _ => false,
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<QueryKey, CacheEntry>,
    // most recently read key per resource, source of placeholder data
    last_read: HashMap<ResourceType, QueryKey>,
    next_fetch_id: u64,
}

#[derive(Clone, Default)]
pub struct QueryCache {
    inner: Arc<RwLock<CacheState>>,
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache").finish_non_exhaustive()
    }
}

fn downcast<T: Clone + 'static>(payload: &Payload) -> Option<T> {
    let value = payload.downcast_ref::<T>().cloned();
    if value.is_none() {
        warn!("cached payload has an unexpected type");
    }
    value
}

fn is_retryable(err: &SyncError) -> bool {
    matches!(err.kind(), ErrorKind::Network | ErrorKind::Server)
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `key`, calling `fetcher` only when the entry is absent,
    /// stale or invalidated.
    pub async fn read<T, F, Fut>(
        &self,
        key: QueryKey,
        options: ReadOptions,
        fetcher: F,
    ) -> QueryResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let now = Instant::now();
        let (fetch, placeholder, last_error) = {
            let mut state = self.inner.write().await;

            if let Some(entry) = state.entries.get(&key) {
                if entry.is_fresh(now, options.stale_time) {
                    debug!(key = %key, "cache hit");
                    let data = entry.data.as_ref().and_then(downcast::<T>);
                    state.last_read.insert(key.resource, key.clone());
                    return QueryResult::ready(data);
                }
            }

            let placeholder = if options.placeholder_previous {
                placeholder_for::<T>(&state, &key)
            } else {
                None
            };
            let last_error = state.entries.get(&key).and_then(|e| e.last_error.clone());
            let fetch = self.attach_or_start(&mut state, &key, options.retry, fetcher);
            state.last_read.insert(key.resource, key.clone());
            (fetch, placeholder, last_error)
        };

        if let Some(previous) = placeholder {
            // keep the fetch running even though nobody awaits it here
            tokio::spawn(fetch.map(|_| ()));
            // surface how the previous refresh of this key ended
            return QueryResult {
                data: Some(previous),
                is_loading: true,
                is_placeholder: true,
                error: last_error,
            };
        }

        match fetch.await {
            Ok(payload) => QueryResult::ready(downcast::<T>(&payload)),
            Err(err) => QueryResult {
                data: self.peek::<T>(&key).await,
                is_loading: false,
                is_placeholder: false,
                error: Some(err),
            },
        }
    }

    fn attach_or_start<T, F, Fut>(
        &self,
        state: &mut CacheState,
        key: &QueryKey,
        retry: bool,
        fetcher: F,
    ) -> SharedFetch
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        if let Some((_, pending)) = state.entries.get(key).and_then(|e| e.in_flight.as_ref()) {
            debug!(key = %key, "attaching to in-flight fetch");
            return pending.clone();
        }

        state.next_fetch_id += 1;
        let fetch_id = state.next_fetch_id;
        let entry = state.entries.entry(key.clone()).or_default();
        let started_epoch = entry.epoch;
        debug!(key = %key, fetch_id, "starting fetch");

        let inner = Arc::clone(&self.inner);
        let owned_key = key.clone();
        let fut = async move {
            let mut result = fetcher().await;
            if retry {
                if let Err(err) = &result {
                    if is_retryable(err) {
                        debug!(key = %owned_key, error = %err, "retrying read once");
                        result = fetcher().await;
                    }
                }
            }
            let result = result.map(|value| Arc::new(value) as Payload);

            let mut state = inner.write().await;
            let entry = state.entries.entry(owned_key.clone()).or_default();
            if matches!(entry.in_flight, Some((id, _)) if id == fetch_id) {
                entry.in_flight = None;
            }
            match &result {
                Ok(payload) if fetch_id > entry.stored_fetch => {
                    entry.data = Some(Arc::clone(payload));
                    entry.fetched_at = Some(Instant::now());
                    entry.stored_fetch = fetch_id;
                    // invalidated while we were on the wire
                    entry.stale = entry.epoch != started_epoch;
                    entry.last_error = None;
                }
                Ok(_) => {
                    debug!(key = %owned_key, fetch_id, "newer data already stored, dropping response");
                }
                Err(err) => {
                    warn!(key = %owned_key, error = %err, "fetch failed, keeping previous data");
                    entry.last_error = Some(err.clone());
                }
            }
            result
        }
        .boxed()
        .shared();

        entry.in_flight = Some((fetch_id, fut.clone()));
        fut
    }

    /// Current data for `key` without touching the network.
    pub async fn peek<T: Clone + 'static>(&self, key: &QueryKey) -> Option<T> {
        let state = self.inner.read().await;
        state
            .entries
            .get(key)
            .and_then(|entry| entry.data.as_ref())
            .and_then(downcast::<T>)
    }

    async fn in_flight(&self, key: &QueryKey) -> Option<SharedFetch> {
        let state = self.inner.read().await;
        state
            .entries
            .get(key)
            .and_then(|entry| entry.in_flight.as_ref())
            .map(|(_, fetch)| fetch.clone())
    }

    /// Waits for the fetch currently in flight for `key` (if any), then
    /// returns whatever is cached.
    pub async fn settled<T: Clone + 'static>(&self, key: &QueryKey) -> Option<T> {
        if let Some(fetch) = self.in_flight(key).await {
            let _ = fetch.await;
        }
        self.peek(key).await
    }

    /// Waits for the fetch currently in flight for `key` (if any) and
    /// returns the error it ended with. Without a fetch in flight this is
    /// the error of the last completed one.
    pub async fn settled_error(&self, key: &QueryKey) -> Option<SyncError> {
        if let Some(fetch) = self.in_flight(key).await {
            return fetch.await.err();
        }
        let state = self.inner.read().await;
        state.entries.get(key).and_then(|entry| entry.last_error.clone())
    }

    pub async fn entry_state(&self, key: &QueryKey) -> Option<EntryState> {
        let state = self.inner.read().await;
        state.entries.get(key).map(|entry| EntryState {
            has_data: entry.data.is_some(),
            is_stale: entry.stale,
            is_fetching: entry.in_flight.is_some(),
            fetched_at: entry.fetched_at,
            last_error: entry.last_error.clone(),
        })
    }

    /// Injects `data` as the fresh value of `key`.
    pub async fn write<T: Send + Sync + 'static>(&self, key: QueryKey, data: T) {
        let mut state = self.inner.write().await;
        state.next_fetch_id += 1;
        let write_id = state.next_fetch_id;
        let entry = state.entries.entry(key).or_default();
        entry.data = Some(Arc::new(data));
        entry.fetched_at = Some(Instant::now());
        entry.stored_fetch = write_id;
        entry.stale = false;
        entry.last_error = None;
    }

    /// Patches the data of `key` in place, leaving freshness untouched.
    /// Returns `false` when there is nothing cached to patch.
    pub async fn update<T, F>(&self, key: &QueryKey, f: F) -> bool
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&mut T),
    {
        let mut state = self.inner.write().await;
        let Some(entry) = state.entries.get_mut(key) else {
            return false;
        };
        let Some(mut value) = entry.data.as_ref().and_then(downcast::<T>) else {
            return false;
        };
        f(&mut value);
        entry.data = Some(Arc::new(value));
        true
    }

    /// Applies `f` to every cached value of `resource`, returning how many
    /// entries reported a change.
    pub async fn update_all<T, F>(&self, resource: ResourceType, mut f: F) -> usize
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut(&QueryKey, &mut T) -> bool,
    {
        let mut state = self.inner.write().await;
        let mut changed = 0;
        for (key, entry) in state.entries.iter_mut() {
            if key.resource != resource {
                continue;
            }
            let Some(mut value) = entry.data.as_ref().and_then(downcast::<T>) else {
                continue;
            };
            if f(key, &mut value) {
                entry.data = Some(Arc::new(value));
                changed += 1;
            }
        }
        changed
    }

    /// First `Some` produced by `f` over the cached values of `resource`.
    pub async fn scan<T, R, F>(&self, resource: ResourceType, mut f: F) -> Option<R>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut(&QueryKey, &T) -> Option<R>,
    {
        let state = self.inner.read().await;
        state
            .entries
            .iter()
            .filter(|(key, _)| key.resource == resource)
            .find_map(|(key, entry)| {
                let value = entry.data.as_ref()?.downcast_ref::<T>()?;
                f(key, value)
            })
    }

    /// Marks every entry of `resource` stale. Data stays readable through
    /// [`peek`](Self::peek) and as placeholder; the next read refetches.
    pub async fn invalidate(&self, resource: ResourceType) -> usize {
        let mut state = self.inner.write().await;
        let mut count = 0;
        for (key, entry) in state.entries.iter_mut() {
            if key.resource == resource {
                entry.stale = true;
                entry.epoch += 1;
                // later readers must not attach to a pre-invalidation fetch
                entry.in_flight = None;
                count += 1;
            }
        }
        debug!(resource = resource.as_str(), count, "invalidated");
        count
    }

    pub async fn invalidate_key(&self, key: &QueryKey) {
        let mut state = self.inner.write().await;
        if let Some(entry) = state.entries.get_mut(key) {
            entry.stale = true;
            entry.epoch += 1;
            entry.in_flight = None;
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn placeholder_for<T: Clone + 'static>(state: &CacheState, key: &QueryKey) -> Option<T> {
    let own = state
        .entries
        .get(key)
        .and_then(|e| e.data.as_ref())
        .and_then(downcast::<T>);
    own.or_else(|| {
        let previous = state.last_read.get(&key.resource)?;
        state
            .entries
            .get(previous)
            .and_then(|e| e.data.as_ref())
            .and_then(downcast::<T>)
    })
}
