//! Pipeline registry
//!
//! Per stream identifier:
//! ```text
//! absent ──ensure──► creating ──built──► ready ──close──► absent
//!                       │                  │
//!                       └──close/failure───┴──graph closed──► purged on next ensure
//! ```
//!
//! Creation is single-flight: concurrent `ensure` calls for one stream
//! share a single spawned creation task and receive the same result.
//! A creation that fails or is overtaken by a close never registers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::media::MediaProvider;
use super::scheduler::{ListenerId, Scheduler};
use crate::config::{EngineConfig, StatusPolicy};
use crate::error::{AurisError, Result};
use crate::pipeline::{Pipeline, PipelineParams};

/// A ready pipeline, shared between the registry and its scheduler listener
pub type SharedPipeline = Arc<Mutex<Pipeline>>;

type Creation = Shared<BoxFuture<'static, Result<SharedPipeline>>>;

enum Slot {
    Creating {
        generation: u64,
        creation: Creation,
    },
    Ready {
        pipeline: SharedPipeline,
        listener: ListenerId,
    },
}

enum Lookup {
    Ready(SharedPipeline),
    Pending(Creation),
    Stale,
    Absent,
}

/// When a stream was last touched
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityStamp {
    /// Monotonic time, used for recency
    pub at: Instant,
    /// Wall-clock time, reported to clients
    pub wall: DateTime<Utc>,
}

impl ActivityStamp {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// Audio-activity report for one stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub audio_active: bool,
    pub last_active: Option<DateTime<Utc>>,
    pub rms: f32,
}

/// Audio counts as present if the signal is above the RMS threshold or the
/// stream was active within the recency window
pub fn audio_activity(rms: f32, since_last: Option<Duration>, policy: &StatusPolicy) -> bool {
    let recent = since_last.is_some_and(|since| since < Duration::from_millis(policy.recency_ms));
    rms > policy.rms_threshold || recent
}

#[derive(Default)]
struct RegistryState {
    slots: HashMap<String, Slot>,
    activity: HashMap<String, ActivityStamp>,
    next_generation: u64,
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    provider: Arc<dyn MediaProvider>,
    scheduler: Scheduler,
    config: EngineConfig,
}

/// Owns every pipeline of one orchestrator
#[derive(Clone)]
pub struct PipelineRegistry {
    inner: Arc<RegistryInner>,
}

impl PipelineRegistry {
    pub fn new(provider: Arc<dyn MediaProvider>, scheduler: Scheduler, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                provider,
                scheduler,
                config,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Return the ready pipeline for `stream_id`, creating it if needed
    ///
    /// `params` only apply when this call starts the creation; callers that
    /// join an in-flight creation get the pipeline as it was built.
    pub async fn ensure(&self, stream_id: &str, params: &PipelineParams) -> Result<SharedPipeline> {
        let creation = {
            let mut state = self.inner.state.lock();
            let lookup = match state.slots.get(stream_id) {
                Some(Slot::Ready { pipeline, .. }) => {
                    if pipeline.lock().is_closed() {
                        Lookup::Stale
                    } else {
                        Lookup::Ready(Arc::clone(pipeline))
                    }
                }
                Some(Slot::Creating { creation, .. }) => Lookup::Pending(creation.clone()),
                None => Lookup::Absent,
            };

            match lookup {
                Lookup::Ready(pipeline) => {
                    state.activity.insert(stream_id.to_string(), ActivityStamp::now());
                    return Ok(pipeline);
                }
                Lookup::Pending(creation) => creation,
                Lookup::Stale => {
                    if let Some(Slot::Ready { listener, .. }) = state.slots.remove(stream_id) {
                        self.inner.scheduler.remove(listener);
                    }
                    debug!(stream_id, "Purged pipeline with a closed graph");
                    self.start_creation(&mut state, stream_id, params)
                }
                Lookup::Absent => self.start_creation(&mut state, stream_id, params),
            }
        };

        let pipeline = creation.await?;
        self.mark_active(stream_id);
        Ok(pipeline)
    }

    fn start_creation(
        &self,
        state: &mut RegistryState,
        stream_id: &str,
        params: &PipelineParams,
    ) -> Creation {
        state.next_generation += 1;
        let generation = state.next_generation;

        let task = tokio::spawn(create_pipeline(
            Arc::clone(&self.inner),
            stream_id.to_string(),
            params.clone(),
            generation,
        ));
        let id = stream_id.to_string();
        let creation = async move {
            task.await.unwrap_or_else(|e| {
                warn!(stream_id = %id, error = %e, "Pipeline creation task aborted");
                Err(AurisError::CreationCancelled { stream_id: id })
            })
        }
        .boxed()
        .shared();

        state.slots.insert(
            stream_id.to_string(),
            Slot::Creating {
                generation,
                creation: creation.clone(),
            },
        );
        debug!(stream_id, generation, "Pipeline creation started");
        creation
    }

    /// Tear down one pipeline
    ///
    /// Detaches the scheduler listener before closing the graph. An in-flight
    /// creation is cancelled. Returns false if nothing was registered.
    pub fn close(&self, stream_id: &str) -> bool {
        let slot = self.inner.state.lock().slots.remove(stream_id);
        match slot {
            Some(Slot::Ready { pipeline, listener }) => {
                self.inner.scheduler.remove(listener);
                pipeline.lock().close();
                true
            }
            Some(Slot::Creating { generation, .. }) => {
                debug!(stream_id, generation, "In-flight creation cancelled by close");
                true
            }
            None => false,
        }
    }

    /// Tear down every pipeline
    ///
    /// # Returns
    /// Number of ready pipelines closed
    pub fn close_all(&self) -> usize {
        let slots: Vec<(String, Slot)> = self.inner.state.lock().slots.drain().collect();
        let mut closed = 0;
        for (stream_id, slot) in slots {
            match slot {
                Slot::Ready { pipeline, listener } => {
                    self.inner.scheduler.remove(listener);
                    pipeline.lock().close();
                    closed += 1;
                }
                Slot::Creating { generation, .. } => {
                    debug!(stream_id = %stream_id, generation, "In-flight creation cancelled by close-all");
                }
            }
        }
        info!(closed, "All pipelines closed");
        closed
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// The ready pipeline for `stream_id`, if its graph is still open
    pub fn get(&self, stream_id: &str) -> Option<SharedPipeline> {
        match self.inner.state.lock().slots.get(stream_id) {
            Some(Slot::Ready { pipeline, .. }) if !pipeline.lock().is_closed() => {
                Some(Arc::clone(pipeline))
            }
            _ => None,
        }
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.get(stream_id).is_some()
    }

    /// Like [`get`](Self::get) but failing with `PipelineNotInitialized`
    pub fn require(&self, stream_id: &str) -> Result<SharedPipeline> {
        self.get(stream_id)
            .ok_or_else(|| AurisError::PipelineNotInitialized {
                stream_id: stream_id.to_string(),
            })
    }

    /// Identifiers of all ready pipelines, sorted
    pub fn ready_ids(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        let mut ids: Vec<String> = state
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready { .. }))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.ready_ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mark_active(&self, stream_id: &str) {
        self.inner
            .state
            .lock()
            .activity
            .insert(stream_id.to_string(), ActivityStamp::now());
    }

    pub fn last_active(&self, stream_id: &str) -> Option<ActivityStamp> {
        self.inner.state.lock().activity.get(stream_id).copied()
    }

    /// The stream most likely being listened to
    ///
    /// One ready pipeline wins outright; among several, the most recently
    /// active one.
    pub fn resolve_active(&self) -> Result<String> {
        let ids = self.ready_ids();
        match ids.len() {
            0 => Err(AurisError::NoActiveStreams),
            1 => Ok(ids.into_iter().next().unwrap_or_default()),
            _ => {
                let state = self.inner.state.lock();
                ids.into_iter()
                    .max_by_key(|id| state.activity.get(id).map(|stamp| stamp.at))
                    .ok_or(AurisError::NoActiveStreams)
            }
        }
    }

    /// Audio-activity heuristic for one stream
    pub fn status(&self, stream_id: &str) -> StreamStatus {
        let rms = self.get(stream_id).map(|p| p.lock().rms()).unwrap_or(0.0);
        let stamp = self.last_active(stream_id);
        let since = stamp.map(|s| Instant::now().duration_since(s.at));
        StreamStatus {
            audio_active: audio_activity(rms, since, &self.inner.config.status),
            last_active: stamp.map(|s| s.wall),
            rms,
        }
    }
}

/// Open media, build the graph and register it if the creation is still current
async fn create_pipeline(
    inner: Arc<RegistryInner>,
    stream_id: String,
    params: PipelineParams,
    generation: u64,
) -> Result<SharedPipeline> {
    let built = match inner.provider.open(&stream_id).await {
        Ok(media) => Pipeline::build(stream_id.clone(), media, &params, &inner.config),
        Err(e) => Err(e),
    };

    let mut state = inner.state.lock();
    let current = matches!(
        state.slots.get(&stream_id),
        Some(Slot::Creating { generation: g, .. }) if *g == generation
    );

    match built {
        Err(e) => {
            if current {
                state.slots.remove(&stream_id);
            }
            warn!(stream_id = %stream_id, error = %e, "Pipeline creation failed");
            Err(e)
        }
        Ok(mut pipeline) if !current => {
            drop(state);
            pipeline.close();
            Err(AurisError::CreationCancelled { stream_id })
        }
        Ok(pipeline) => {
            let shared = Arc::new(Mutex::new(pipeline));
            let listener = inner.scheduler.add(pump_listener(&shared));
            state.slots.insert(
                stream_id.clone(),
                Slot::Ready {
                    pipeline: Arc::clone(&shared),
                    listener,
                },
            );
            state
                .activity
                .insert(stream_id.clone(), ActivityStamp::now());
            info!(stream_id = %stream_id, generation, "Pipeline ready");
            Ok(shared)
        }
    }
}

/// Scheduler callback rendering the audio elapsed since the previous tick
fn pump_listener(pipeline: &SharedPipeline) -> impl FnMut(f64) + Send + 'static {
    let weak = Arc::downgrade(pipeline);
    move |delta_ms| {
        let Some(pipeline) = weak.upgrade() else {
            return;
        };
        let mut guard = pipeline.lock();
        if let Err(e) = guard.pump(delta_ms) {
            warn!(stream_id = %guard.stream_id(), error = %e, "Pipeline step failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MediaStream;
    use async_trait::async_trait;
    use futures_util::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts opens and takes a while to open
    #[derive(Default)]
    struct SlowProvider {
        opens: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MediaProvider for SlowProvider {
        async fn open(&self, stream_id: &str) -> Result<MediaStream> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(AurisError::MediaUnavailable {
                    stream_id: stream_id.to_string(),
                    reason: "denied".to_string(),
                });
            }
            Ok(MediaStream::silent())
        }
    }

    fn registry(provider: Arc<SlowProvider>) -> PipelineRegistry {
        PipelineRegistry::new(provider, Scheduler::new(), EngineConfig::default())
    }

    #[tokio::test]
    async fn test_single_flight_creation() {
        let provider = Arc::new(SlowProvider::default());
        let registry = registry(Arc::clone(&provider));
        let params = PipelineParams::default();

        let results = join_all((0..8).map(|_| registry.ensure("T1", &params))).await;

        assert_eq!(provider.opens.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
        assert_eq!(registry.scheduler().len(), 1);
    }

    #[tokio::test]
    async fn test_streams_create_independently() {
        let provider = Arc::new(SlowProvider::default());
        let registry = registry(Arc::clone(&provider));
        let params = PipelineParams::default();

        let (a, b) = tokio::join!(registry.ensure("T1", &params), registry.ensure("T2", &params));
        assert!(!Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(provider.opens.load(Ordering::SeqCst), 2);
        assert_eq!(registry.ready_ids(), vec!["T1".to_string(), "T2".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_creation_is_not_registered() {
        let provider = Arc::new(SlowProvider {
            fail: true,
            ..Default::default()
        });
        let registry = registry(Arc::clone(&provider));

        let result = registry.ensure("T1", &PipelineParams::default()).await;
        assert!(matches!(result, Err(AurisError::MediaUnavailable { .. })));
        assert!(!registry.contains("T1"));
        assert!(registry.scheduler().is_empty());

        // A later attempt starts a new creation
        let _ = registry.ensure("T1", &PipelineParams::default()).await;
        assert_eq!(provider.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_cancels_in_flight_creation() {
        let provider = Arc::new(SlowProvider::default());
        let registry = registry(Arc::clone(&provider));
        let params = PipelineParams::default();

        let pending = registry.ensure("T1", &params);
        let closer = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            registry.close("T1")
        };
        let (result, closed) = tokio::join!(pending, closer);

        assert!(closed);
        assert!(matches!(result, Err(AurisError::CreationCancelled { .. })));
        assert!(!registry.contains("T1"));
        assert!(registry.scheduler().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let registry = registry(Arc::new(SlowProvider::default()));
        assert!(!registry.close("missing"));

        registry.ensure("T1", &PipelineParams::default()).await.unwrap();
        assert!(registry.close("T1"));
        assert!(!registry.close("T1"));
        assert!(registry.scheduler().is_empty());
    }

    #[tokio::test]
    async fn test_closed_graph_is_purged_and_rebuilt() {
        let provider = Arc::new(SlowProvider::default());
        let registry = registry(Arc::clone(&provider));
        let params = PipelineParams::default();

        let first = registry.ensure("T1", &params).await.unwrap();
        first.lock().close();
        assert!(!registry.contains("T1"));

        let second = registry.ensure("T1", &params).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(provider.opens.load(Ordering::SeqCst), 2);
        assert_eq!(registry.scheduler().len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_counts_ready_pipelines() {
        let registry = registry(Arc::new(SlowProvider::default()));
        let params = PipelineParams::default();
        registry.ensure("T1", &params).await.unwrap();
        registry.ensure("T2", &params).await.unwrap();

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.close_all(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_active_prefers_most_recent() {
        let registry = registry(Arc::new(SlowProvider::default()));
        let params = PipelineParams::default();
        assert_eq!(registry.resolve_active(), Err(AurisError::NoActiveStreams));

        registry.ensure("T1", &params).await.unwrap();
        assert_eq!(registry.resolve_active().unwrap(), "T1");

        registry.ensure("T2", &params).await.unwrap();
        tokio::time::advance(Duration::from_millis(100)).await;
        registry.mark_active("T1");
        assert_eq!(registry.resolve_active().unwrap(), "T1");

        tokio::time::advance(Duration::from_millis(100)).await;
        registry.mark_active("T2");
        assert_eq!(registry.resolve_active().unwrap(), "T2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_recency_window() {
        let registry = registry(Arc::new(SlowProvider::default()));
        registry.ensure("T1", &PipelineParams::default()).await.unwrap();

        let status = registry.status("T1");
        assert!(status.audio_active);
        assert!(status.last_active.is_some());
        assert_eq!(status.rms, 0.0);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!registry.status("T1").audio_active);
    }

    #[test]
    fn test_audio_activity_heuristic() {
        let policy = StatusPolicy::default();
        assert!(audio_activity(0.004, Some(Duration::from_secs(10)), &policy));
        assert!(audio_activity(0.0, Some(Duration::from_secs(1)), &policy));
        assert!(!audio_activity(0.0025, Some(Duration::from_secs(5)), &policy));
        assert!(!audio_activity(0.0, None, &policy));
    }
}
