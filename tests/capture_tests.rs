//! Capture Routing Tests
//!
//! Tab-addressed events through the router, with scripted capture conflicts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;

use auris::capture::{
    CaptureMessage, CaptureProvider, CaptureRouter, MemorySessionStore, SessionStore, TabId,
    GAIN_KEY, STREAM_ID_KEY,
};
use auris::orchestrator::SilentMediaProvider;
use auris::{AurisError, EngineConfig, Orchestrator, Result};

/// Conflicts on the first `conflicts` calls, then hands out `stream-<tab>-<n>`
#[derive(Default)]
struct ScriptedProvider {
    calls: AtomicUsize,
    conflicts: usize,
}

impl ScriptedProvider {
    fn conflicting(conflicts: usize) -> Self {
        Self {
            conflicts,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureProvider for ScriptedProvider {
    async fn acquire(&self, tab: TabId) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.conflicts {
            return Err(AurisError::AcquisitionConflict {
                target: tab.to_string(),
            });
        }
        Ok(format!("stream-{}-{}", tab, n))
    }
}

fn router(provider: Arc<ScriptedProvider>, store: Arc<MemorySessionStore>) -> CaptureRouter {
    let orchestrator = Orchestrator::new(Arc::new(SilentMediaProvider), EngineConfig::default());
    CaptureRouter::new(orchestrator, provider, store)
}

fn apply_volume(tab: TabId, percent: f32) -> CaptureMessage {
    let mut message = CaptureMessage::new("applySettings", tab);
    message.settings = Some(json!({ "volumeBoost": percent }));
    message
}

// === Routing ===

#[tokio::test]
async fn test_apply_settings_creates_pipeline_and_records_gain() {
    let provider = Arc::new(ScriptedProvider::default());
    let store = Arc::new(MemorySessionStore::new());
    let router = router(provider.clone(), store.clone());

    let response = router.route(&apply_volume(7, 300.0)).await;
    assert_eq!(response["ok"], true);
    assert_eq!(response["streamId"], "stream-7-0");
    assert_eq!(response["offscreen"], json!({ "ok": true, "gain": 1.0 }));

    assert!(router.orchestrator().registry().contains("stream-7-0"));
    assert_eq!(router.gains().get(7).await.unwrap(), Some(3.0));
    assert_eq!(
        store.get(STREAM_ID_KEY).await.unwrap(),
        Some(json!({ "7": "stream-7-0" }))
    );

    // Memoized afterwards
    let again = router.route(&apply_volume(7, 200.0)).await;
    assert_eq!(again["streamId"], "stream-7-0");
    assert_eq!(provider.calls(), 1);
    assert_eq!(router.gains().get(7).await.unwrap(), Some(2.0));
}

#[tokio::test]
async fn test_request_status_shape() {
    let router = router(
        Arc::new(ScriptedProvider::default()),
        Arc::new(MemorySessionStore::new()),
    );
    router.route(&apply_volume(3, 100.0)).await;

    let response = router.route(&CaptureMessage::new("requestStatus", 3)).await;
    assert_eq!(response["ok"], true);
    assert_eq!(response["streamId"], "stream-3-0");
    assert_eq!(response["status"]["ok"], true);
    assert_eq!(response["status"]["audioActive"], true);
    assert!(response.get("offscreen").is_none());
}

#[tokio::test]
async fn test_update_controls_records_percent() {
    let router = router(
        Arc::new(ScriptedProvider::default()),
        Arc::new(MemorySessionStore::new()),
    );
    let mut message = CaptureMessage::new("updateControls", 5);
    message.controls = Some(json!({ "volumeBoost": 450 }));

    let response = router.route(&message).await;
    assert_eq!(response["offscreen"]["ok"], true);
    assert_eq!(router.gains().get(5).await.unwrap(), Some(4.5));
}

#[tokio::test]
async fn test_rejects_non_capture_events_and_missing_tab() {
    let router = router(
        Arc::new(ScriptedProvider::default()),
        Arc::new(MemorySessionStore::new()),
    );

    let close = router.route(&CaptureMessage::new("closeAllContexts", 1)).await;
    assert_eq!(close["ok"], false);
    assert_eq!(close["code"], "UNKNOWN_EVENT");

    let mut untargeted = CaptureMessage::new("toggleEffect", 1);
    untargeted.tab_id = None;
    let response = router.route(&untargeted).await;
    assert_eq!(response["error"], "Invalid payload: Missing tabId for capture event");
}

#[tokio::test]
async fn test_new_tab_adopts_active_stream() {
    let provider = Arc::new(ScriptedProvider::default());
    let router = router(provider.clone(), Arc::new(MemorySessionStore::new()));

    router.route(&apply_volume(1, 100.0)).await;
    let response = router.route(&apply_volume(2, 100.0)).await;

    assert_eq!(response["streamId"], "stream-1-0");
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_persisted_stream_id_is_reused() {
    let provider = Arc::new(ScriptedProvider::default());
    let store = Arc::new(MemorySessionStore::new());
    store
        .set(STREAM_ID_KEY, json!({ "9": "restored-9" }))
        .await
        .unwrap();
    let router = router(provider.clone(), store);

    let response = router.route(&apply_volume(9, 100.0)).await;
    assert_eq!(response["streamId"], "restored-9");
    assert_eq!(provider.calls(), 0);
}

// === Conflicts ===

#[tokio::test(start_paused = true)]
async fn test_conflict_recovers_with_plain_retries() {
    let provider = Arc::new(ScriptedProvider::conflicting(2));
    let router = router(provider.clone(), Arc::new(MemorySessionStore::new()));

    let started = Instant::now();
    let response = router.route(&apply_volume(4, 100.0)).await;

    assert_eq!(response["streamId"], "stream-4-2");
    assert_eq!(provider.calls(), 3);
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(120) && elapsed < Duration::from_millis(130),
        "Expected two 60ms retries, got {:?}",
        elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn test_conflict_falls_back_to_global_teardown() {
    let provider = Arc::new(ScriptedProvider::conflicting(3));
    let router = router(provider.clone(), Arc::new(MemorySessionStore::new()));

    let started = Instant::now();
    let response = router.route(&apply_volume(4, 100.0)).await;

    assert_eq!(response["ok"], true);
    assert_eq!(response["streamId"], "stream-4-3");
    assert_eq!(provider.calls(), 4);
    // 2 × 60ms retries, then the 200ms cooldown
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(320) && elapsed < Duration::from_millis(330),
        "Expected retries plus cooldown, got {:?}",
        elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn test_conflict_exhausted_is_fatal() {
    let provider = Arc::new(ScriptedProvider::conflicting(usize::MAX));
    let router = router(provider.clone(), Arc::new(MemorySessionStore::new()));

    let response = router.route(&apply_volume(4, 100.0)).await;

    assert_eq!(response["ok"], false);
    assert_eq!(response["code"], "ACQUISITION_FAILED");
    assert_eq!(provider.calls(), 4);
    assert!(router.orchestrator().registry().is_empty());
}

// === Tab removal ===

#[tokio::test]
async fn test_tab_removal_cleans_up() {
    let store = Arc::new(MemorySessionStore::new());
    let router = router(Arc::new(ScriptedProvider::default()), store.clone());
    router.route(&apply_volume(6, 250.0)).await;
    assert!(router.orchestrator().registry().contains("stream-6-0"));

    router.on_tab_removed(6).await;

    assert!(!router.orchestrator().registry().contains("stream-6-0"));
    assert_eq!(router.gains().get(6).await.unwrap(), None);
    assert_eq!(store.get(STREAM_ID_KEY).await.unwrap(), Some(json!({})));
    assert_eq!(store.get(GAIN_KEY).await.unwrap(), Some(json!({})));
}
