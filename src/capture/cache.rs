//! Tab → stream identifier cache
//!
//! Hydrated once from the session store and persisted on every change.
//! Acquisition is single-flight per tab and honours the grace period after
//! a global teardown. When a tab turns out to be captured already, the last
//! persisted identifier for it is reused.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::provider::{CaptureProvider, TabId};
use super::store::{read_map, SessionStore};
use crate::config::RetryPolicy;
use crate::error::{AurisError, Result};

/// Session-store key of the persisted identifiers
pub const STREAM_ID_KEY: &str = "aurisStreamIdByTab";

type Acquisition = Shared<BoxFuture<'static, Result<String>>>;

#[derive(Default)]
struct CacheState {
    ids: BTreeMap<TabId, String>,
    inflight: HashMap<TabId, Acquisition>,
    last_global_close: Option<Instant>,
}

struct CacheInner {
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn CaptureProvider>,
    policy: RetryPolicy,
    hydrated: OnceCell<()>,
    state: Mutex<CacheState>,
}

#[derive(Clone)]
pub struct StreamIdCache {
    inner: Arc<CacheInner>,
}

impl StreamIdCache {
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn CaptureProvider>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                provider,
                policy,
                hydrated: OnceCell::new(),
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Cached identifier for `tab`, acquiring one if there is none
    pub async fn acquire(&self, tab: TabId) -> Result<String> {
        self.inner.hydrate().await;

        let pending = {
            let mut state = self.inner.state.lock();
            if let Some(id) = state.ids.get(&tab) {
                return Ok(id.clone());
            }
            match state.inflight.get(&tab) {
                Some(pending) => pending.clone(),
                None => {
                    let task = tokio::spawn(acquire_fresh(Arc::clone(&self.inner), tab));
                    let pending = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(AurisError::AcquisitionFailed {
                                target: tab.to_string(),
                                reason: e.to_string(),
                            })
                        })
                    }
                    .boxed()
                    .shared();
                    state.inflight.insert(tab, pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Identifier known for `tab` without acquiring
    pub async fn persisted(&self, tab: TabId) -> Option<String> {
        self.inner.hydrate().await;
        if let Some(id) = self.inner.state.lock().ids.get(&tab) {
            return Some(id.clone());
        }
        self.inner.stored_id(tab).await
    }

    pub async fn set(&self, tab: TabId, stream_id: &str) {
        self.inner.hydrate().await;
        self.inner
            .state
            .lock()
            .ids
            .insert(tab, stream_id.to_string());
        self.inner.persist().await;
    }

    /// Forget `tab`, returning the identifier it had
    pub async fn clear(&self, tab: TabId) -> Option<String> {
        self.inner.hydrate().await;
        let removed = self.inner.state.lock().ids.remove(&tab);
        self.inner.persist().await;
        removed
    }

    /// Record a global teardown; acquisitions shortly after it wait out the grace period
    pub fn note_global_close(&self) {
        self.inner.state.lock().last_global_close = Some(Instant::now());
    }
}

impl CacheInner {
    async fn hydrate(&self) {
        self.hydrated
            .get_or_init(|| async {
                match read_map(self.store.as_ref(), STREAM_ID_KEY).await {
                    Ok(persisted) => {
                        let mut state = self.state.lock();
                        for (key, value) in persisted {
                            if let (Ok(tab), Some(id)) = (key.parse::<TabId>(), value.as_str()) {
                                state.ids.entry(tab).or_insert_with(|| id.to_string());
                            }
                        }
                        debug!(tabs = state.ids.len(), "Stream id cache hydrated");
                    }
                    Err(e) => debug!(error = %e, "Stream id cache hydration failed"),
                }
            })
            .await;
    }

    async fn persist(&self) {
        let snapshot: Map<String, Value> = self
            .state
            .lock()
            .ids
            .iter()
            .map(|(tab, id)| (tab.to_string(), Value::from(id.as_str())))
            .collect();
        if let Err(e) = self.store.set(STREAM_ID_KEY, Value::Object(snapshot)).await {
            warn!(error = %e, "Failed to persist stream ids");
        }
    }

    async fn stored_id(&self, tab: TabId) -> Option<String> {
        let persisted = read_map(self.store.as_ref(), STREAM_ID_KEY).await.ok()?;
        persisted
            .get(&tab.to_string())
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn grace_wait(&self) -> Option<std::time::Duration> {
        let since = self.state.lock().last_global_close?.elapsed();
        self.policy.grace_remaining(since)
    }
}

async fn acquire_fresh(inner: Arc<CacheInner>, tab: TabId) -> Result<String> {
    if let Some(wait) = inner.grace_wait() {
        debug!(tab, wait_ms = wait.as_millis() as u64, "Waiting out teardown grace period");
        tokio::time::sleep(wait).await;
    }

    let result = match inner.provider.acquire(tab).await {
        Ok(stream_id) => {
            inner.state.lock().ids.insert(tab, stream_id.clone());
            inner.persist().await;
            Ok(stream_id)
        }
        Err(e @ AurisError::AcquisitionConflict { .. }) => match inner.stored_id(tab).await {
            Some(stream_id) => {
                debug!(tab, stream_id = %stream_id, "Tab already captured, reusing persisted id");
                inner.state.lock().ids.insert(tab, stream_id.clone());
                Ok(stream_id)
            }
            None => Err(e),
        },
        Err(e) => Err(e),
    };

    inner.state.lock().inflight.remove(&tab);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::store::MemorySessionStore;
    use async_trait::async_trait;
    use futures_util::future::join_all;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
        conflict: bool,
    }

    #[async_trait]
    impl CaptureProvider for CountingProvider {
        async fn acquire(&self, tab: TabId) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.conflict {
                return Err(AurisError::AcquisitionConflict {
                    target: tab.to_string(),
                });
            }
            Ok(format!("stream-{}-{}", tab, n))
        }
    }

    fn cache(store: Arc<MemorySessionStore>, provider: Arc<CountingProvider>) -> StreamIdCache {
        StreamIdCache::new(store, provider, RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_single_flight_per_tab() {
        let store = Arc::new(MemorySessionStore::new());
        let provider = Arc::new(CountingProvider::default());
        let cache = cache(store.clone(), provider.clone());

        let ids = join_all((0..5).map(|_| cache.acquire(4))).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(ids.iter().all(|id| id.as_ref().unwrap() == "stream-4-0"));
        assert_eq!(
            store.get(STREAM_ID_KEY).await.unwrap(),
            Some(json!({"4": "stream-4-0"}))
        );

        // Cached afterwards
        assert_eq!(cache.acquire(4).await.unwrap(), "stream-4-0");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hydrates_from_store() {
        let store = Arc::new(MemorySessionStore::new());
        store
            .set(STREAM_ID_KEY, json!({"9": "persisted-9", "bogus": 3}))
            .await
            .unwrap();
        let provider = Arc::new(CountingProvider::default());
        let cache = cache(store, provider.clone());

        assert_eq!(cache.acquire(9).await.unwrap(), "persisted-9");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_conflict_reuses_persisted_id() {
        let store = Arc::new(MemorySessionStore::new());
        let provider = Arc::new(CountingProvider {
            conflict: true,
            ..Default::default()
        });
        let cache = cache(store.clone(), provider);

        let err = cache.acquire(2).await.unwrap_err();
        assert!(matches!(err, AurisError::AcquisitionConflict { .. }));

        // Written behind the hydrated cache's back
        store
            .set(STREAM_ID_KEY, json!({"2": "old-2"}))
            .await
            .unwrap();
        assert_eq!(cache.acquire(2).await.unwrap(), "old-2");
    }

    #[tokio::test]
    async fn test_clear_persists_removal() {
        let store = Arc::new(MemorySessionStore::new());
        let cache = cache(store.clone(), Arc::new(CountingProvider::default()));
        cache.set(1, "a").await;
        cache.set(2, "b").await;

        assert_eq!(cache.clear(1).await.as_deref(), Some("a"));
        assert_eq!(cache.persisted(1).await, None);
        assert_eq!(
            store.get(STREAM_ID_KEY).await.unwrap(),
            Some(json!({"2": "b"}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_after_global_close() {
        let cache = cache(
            Arc::new(MemorySessionStore::new()),
            Arc::new(CountingProvider::default()),
        );
        cache.note_global_close();
        tokio::time::advance(Duration::from_millis(40)).await;

        let started = Instant::now();
        cache.acquire(5).await.unwrap();
        // 120 ms of grace left, then 10 ms inside the provider
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(130) && elapsed < Duration::from_millis(140),
            "Expected ~130ms, got {:?}",
            elapsed
        );
    }
}
