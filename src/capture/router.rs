//! Capture router
//!
//! Turns tab-addressed events into stream-addressed orchestrator events:
//! ```text
//! message{tabId} ─► resolve stream id ─► ensure pipeline ─► dispatch ─► gain book
//!                   memo → persisted → active stream → acquire (retry, teardown)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::cache::StreamIdCache;
use super::gains::GainBook;
use super::provider::{CaptureProvider, TabId};
use super::retry::{AcquisitionRetry, RetryStep};
use super::store::SessionStore;
use crate::config::RetryPolicy;
use crate::error::{AurisError, Result};
use crate::orchestrator::events::InitPipelinePayload;
use crate::orchestrator::{error_response, EventKind, Orchestrator};

/// Cached identifiers are distrusted this long after a global teardown
const FRESH_RESOLUTION_WINDOW: Duration = Duration::from_millis(250);

/// Events the router accepts
pub const CAPTURE_EVENTS: [EventKind; 7] = [
    EventKind::ApplySettings,
    EventKind::InitPipeline,
    EventKind::UpdateEq,
    EventKind::UpdateControls,
    EventKind::ToggleEffect,
    EventKind::UpdateEffectParams,
    EventKind::RequestStatus,
];

/// Events that get a pipeline created before they are forwarded
const REQUIRES_PIPELINE: [EventKind; 5] = [
    EventKind::ApplySettings,
    EventKind::UpdateEq,
    EventKind::UpdateControls,
    EventKind::ToggleEffect,
    EventKind::UpdateEffectParams,
];

/// A UI message addressed to a tab
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMessage {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controls: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl CaptureMessage {
    pub fn new(event: impl Into<String>, tab_id: TabId) -> Self {
        Self {
            event: event.into(),
            tab_id: Some(tab_id),
            ..Default::default()
        }
    }

    /// Orchestrator payload for this message addressed to `stream_id`
    fn forward_payload(&self, stream_id: &str) -> Value {
        let mut data = Map::new();
        data.insert("streamId".to_string(), Value::from(stream_id));
        let fields = [
            ("settings", self.settings.clone()),
            ("eq", self.eq.clone()),
            ("index", self.index.clone()),
            ("value", self.value.clone()),
            ("controls", self.controls.clone()),
            ("name", self.name.clone().map(Value::from)),
            ("active", self.active.map(Value::from)),
            ("params", self.params.clone()),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                data.insert(key.to_string(), value);
            }
        }
        Value::Object(data)
    }
}

#[derive(Default)]
struct RouterState {
    memo: HashMap<TabId, String>,
    last_global_close: Option<Instant>,
}

pub struct CaptureRouter {
    orchestrator: Orchestrator,
    cache: StreamIdCache,
    gains: GainBook,
    policy: RetryPolicy,
    state: Mutex<RouterState>,
}

impl CaptureRouter {
    pub fn new(
        orchestrator: Orchestrator,
        provider: Arc<dyn CaptureProvider>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let policy = orchestrator.registry().config().retry.clone();
        Self {
            cache: StreamIdCache::new(Arc::clone(&store), provider, policy.clone()),
            gains: GainBook::new(store),
            orchestrator,
            policy,
            state: Mutex::new(RouterState::default()),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn gains(&self) -> &GainBook {
        &self.gains
    }

    /// Route one message and shape the response
    ///
    /// # Returns
    /// `{ok, streamId, status}` for `requestStatus`, `{ok, streamId, offscreen}`
    /// otherwise, where the inner value is the orchestrator's response.
    pub async fn route(&self, message: &CaptureMessage) -> Value {
        match self.route_capture(message).await {
            Ok(response) => response,
            Err(e) => {
                warn!(event = %message.event, tab = ?message.tab_id, error = %e, "Capture event failed");
                error_response(&e)
            }
        }
    }

    async fn route_capture(&self, message: &CaptureMessage) -> Result<Value> {
        let kind: EventKind = message.event.parse()?;
        if !CAPTURE_EVENTS.contains(&kind) {
            return Err(AurisError::UnknownEvent {
                event: message.event.clone(),
            });
        }
        let tab = message
            .tab_id
            .ok_or_else(|| AurisError::invalid_payload("Missing tabId for capture event"))?;

        let stream_id = self.resolve_stream_id(tab).await?;

        if REQUIRES_PIPELINE.contains(&kind) && !self.orchestrator.registry().contains(&stream_id) {
            // Creation is single-flight in the registry
            self.orchestrator
                .init_pipeline(InitPipelinePayload {
                    stream_id: stream_id.clone(),
                    gain: Some(1.0),
                    eq: None,
                    controls: None,
                })
                .await?;
        }

        let response = self
            .orchestrator
            .dispatch(kind.name(), message.forward_payload(&stream_id))
            .await;

        if let Err(e) = self.record_gain(tab, kind, message).await {
            debug!(tab, error = %e, "Failed to update gain book");
        }

        let key = if kind == EventKind::RequestStatus {
            "status"
        } else {
            "offscreen"
        };
        let mut body = Map::new();
        body.insert("ok".to_string(), Value::Bool(true));
        body.insert("streamId".to_string(), Value::from(stream_id));
        body.insert(key.to_string(), response);
        Ok(Value::Object(body))
    }

    /// memo → persisted → active stream → fresh acquisition
    async fn resolve_stream_id(&self, tab: TabId) -> Result<String> {
        let memo = self.state.lock().memo.get(&tab).cloned();
        let mut candidate = match memo {
            Some(id) => Some(id),
            None => self.cache.persisted(tab).await,
        };

        if candidate.is_some() && self.recently_torn_down() {
            self.state.lock().memo.remove(&tab);
            candidate = None;
        }
        if let Some(stream_id) = candidate {
            self.remember(tab, &stream_id);
            return Ok(stream_id);
        }

        if let Ok(stream_id) = self.orchestrator.registry().resolve_active() {
            debug!(tab, stream_id = %stream_id, "Adopting active stream");
            self.cache.set(tab, &stream_id).await;
            self.remember(tab, &stream_id);
            return Ok(stream_id);
        }

        let stream_id = self.acquire_with_retry(tab).await?;
        self.remember(tab, &stream_id);
        Ok(stream_id)
    }

    async fn acquire_with_retry(&self, tab: TabId) -> Result<String> {
        let mut retry = AcquisitionRetry::new(self.policy.clone());
        loop {
            match self.cache.acquire(tab).await {
                Ok(stream_id) => return Ok(stream_id),
                Err(AurisError::AcquisitionConflict { .. }) => match retry.on_conflict() {
                    RetryStep::Retry(delay) => {
                        debug!(tab, conflicts = retry.conflicts(), "Capture conflict, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    RetryStep::Teardown { cooldown } => {
                        self.global_teardown();
                        tokio::time::sleep(cooldown).await;
                    }
                    RetryStep::GiveUp => {
                        return Err(AurisError::AcquisitionFailed {
                            target: tab.to_string(),
                            reason: format!(
                                "still captured after {} attempts",
                                retry.conflicts()
                            ),
                        });
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Close every pipeline so the platform releases its capture locks
    fn global_teardown(&self) {
        let closed = self.orchestrator.registry().close_all();
        self.cache.note_global_close();
        let mut state = self.state.lock();
        state.last_global_close = Some(Instant::now());
        state.memo.clear();
        info!(closed, "Global teardown to release capture");
    }

    fn recently_torn_down(&self) -> bool {
        self.state
            .lock()
            .last_global_close
            .is_some_and(|at| at.elapsed() < FRESH_RESOLUTION_WINDOW)
    }

    fn remember(&self, tab: TabId, stream_id: &str) {
        self.state.lock().memo.insert(tab, stream_id.to_string());
    }

    async fn record_gain(&self, tab: TabId, kind: EventKind, message: &CaptureMessage) -> Result<()> {
        let field = |source: &Option<Value>, name: &str| {
            source
                .as_ref()
                .and_then(|v| v.get(name))
                .and_then(Value::as_f64)
                .map(|n| n as f32)
        };
        match kind {
            EventKind::ApplySettings => {
                if let Some(percent) = field(&message.settings, "volumeBoost") {
                    self.gains.set_percent(tab, percent).await?;
                } else if let Some(gain) = field(&message.settings, "gain") {
                    self.gains.set_normalized(tab, gain).await?;
                }
            }
            EventKind::UpdateControls => {
                if let Some(percent) = field(&message.controls, "volumeBoost") {
                    self.gains.set_percent(tab, percent).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Forget a closed tab and tear down its pipeline
    pub async fn on_tab_removed(&self, tab: TabId) {
        let memo = self.state.lock().memo.remove(&tab);
        let cached = self.cache.clear(tab).await;
        if let Err(e) = self.gains.remove(tab).await {
            debug!(tab, error = %e, "Failed to drop gain entry");
        }
        if let Some(stream_id) = memo.or(cached) {
            self.orchestrator.registry().close(&stream_id);
        }
        debug!(tab, "Tab removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_forward_payload_copies_present_fields() {
        let mut message = CaptureMessage::new("toggleEffect", 4);
        message.name = Some("echo".to_string());
        message.active = Some(false);

        assert_eq!(
            message.forward_payload("S1"),
            json!({"streamId": "S1", "name": "echo", "active": false})
        );
    }

    #[test]
    fn test_message_deserializes_tab_id() {
        let message: CaptureMessage = serde_json::from_value(json!({
            "event": "updateEQ",
            "tabId": 12,
            "index": 3,
            "value": -2.5
        }))
        .unwrap();
        assert_eq!(message.tab_id, Some(12));
        assert_eq!(message.index, Some(json!(3)));
    }
}
