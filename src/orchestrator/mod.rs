//! Orchestrator
//!
//! Owns the pipeline registry and answers the JSON event surface:
//! - `initPipeline`, `applySettings` (create on demand)
//! - `updateControls`, `updateEQ`, `toggleEffect`, `updateEffectParams` (require a pipeline)
//! - `closeContext`, `closeAllContexts` (idempotent teardown)
//! - `hasPipeline`, `resolveActiveStreamId`, `requestStatus` (queries)
//!
//! Every response is `{ok: true, ...}` or `{ok: false, error, code, message}`.

pub mod events;
pub mod media;
pub mod registry;
pub mod scheduler;

pub use events::{EventKind, EVENTS};
pub use media::{MediaProvider, SilentMediaProvider, WavFileProvider};
pub use registry::{audio_activity, PipelineRegistry, SharedPipeline, StreamStatus};
pub use scheduler::Scheduler;

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::dsp::effects::EffectKind;
use crate::dsp::{validate_eq_array, EQ_BANDS};
use crate::error::{AurisError, Result};
use crate::pipeline::PipelineParams;
use events::{
    parse_payload, ApplySettingsPayload, EffectParamsPayload, InitPipelinePayload,
    StreamPayload, ToggleEffectPayload, UpdateControlsPayload, UpdateEqPayload,
};

/// Event dispatcher over one pipeline registry
#[derive(Clone)]
pub struct Orchestrator {
    registry: PipelineRegistry,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn MediaProvider>, config: EngineConfig) -> Self {
        Self {
            registry: PipelineRegistry::new(provider, Scheduler::new(), config),
        }
    }

    pub fn with_registry(registry: PipelineRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    /// Start the per-frame scheduler on the current tokio runtime
    pub fn start(&self) {
        let period = self.registry.config().scheduler_period();
        self.registry.scheduler().start(period);
    }

    pub fn stop(&self) {
        self.registry.scheduler().stop();
    }

    /// Handle one event and shape the response
    pub async fn dispatch(&self, event: &str, payload: Value) -> Value {
        debug!(event, "Dispatching event");
        match self.handle(event, payload).await {
            Ok(body) => ok_response(body),
            Err(e) => {
                if e.is_recoverable() {
                    debug!(event, error = %e, "Event failed");
                } else {
                    warn!(event, error = %e, "Event failed");
                }
                error_response(&e)
            }
        }
    }

    /// Handle one event, returning the success body without the `ok` flag
    pub async fn handle(&self, event: &str, payload: Value) -> Result<Value> {
        let kind: EventKind = event.parse()?;
        match kind {
            EventKind::InitPipeline => self.init_pipeline(parse_payload(kind, payload)?).await,
            EventKind::ApplySettings => self.apply_settings(parse_payload(kind, payload)?).await,
            EventKind::UpdateEq => self.update_eq(parse_payload(kind, payload)?),
            EventKind::UpdateControls => self.update_controls(parse_payload(kind, payload)?),
            EventKind::ToggleEffect => self.toggle_effect(parse_payload(kind, payload)?),
            EventKind::UpdateEffectParams => {
                self.update_effect_params(parse_payload(kind, payload)?)
            }
            EventKind::RequestStatus => self.request_status(parse_payload(kind, payload)?),
            EventKind::CloseContext => Ok(self.close_context(parse_payload(kind, payload)?)),
            EventKind::ResolveActiveStreamId => self.resolve_active_stream_id(),
            EventKind::HasPipeline => Ok(self.has_pipeline(parse_payload(kind, payload)?)),
            EventKind::CloseAllContexts => Ok(self.close_all_contexts()),
        }
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    pub async fn init_pipeline(&self, payload: InitPipelinePayload) -> Result<Value> {
        let params = PipelineParams {
            gain: payload.gain.unwrap_or(1.0),
            eq: parse_eq(payload.eq.as_ref())?,
            controls: payload.controls.filter(|c| !c.is_empty()),
        };
        self.registry.ensure(&payload.stream_id, &params).await?;
        Ok(json!({}))
    }

    pub fn has_pipeline(&self, payload: StreamPayload) -> Value {
        json!({ "exists": self.registry.contains(&payload.stream_id) })
    }

    /// Create the pipeline if needed, then apply gain, tone and EQ
    pub async fn apply_settings(&self, payload: ApplySettingsPayload) -> Result<Value> {
        let settings = payload.settings;
        let eq = parse_eq(settings.eq.as_ref())?;
        let gain = settings.gain.unwrap_or(1.0);
        let controls = (!settings.controls.is_empty()).then_some(settings.controls);

        let params = PipelineParams {
            gain,
            eq,
            controls,
        };
        let pipeline = self.registry.ensure(&payload.stream_id, &params).await?;
        {
            // EQ is the only fallible step, so it goes first
            let mut pipeline = pipeline.lock();
            if let Some(eq) = &eq {
                pipeline.update_eq_all(eq)?;
            }
            pipeline.update_gain(gain);
            if let Some(controls) = &controls {
                pipeline.update_controls(controls);
            }
        }
        self.registry.mark_active(&payload.stream_id);
        Ok(json!({ "gain": gain }))
    }

    pub fn update_controls(&self, payload: UpdateControlsPayload) -> Result<Value> {
        let pipeline = self.registry.require(&payload.stream_id)?;
        let controls = payload
            .controls
            .ok_or_else(|| AurisError::invalid_payload("Invalid controls payload"))?;
        let calibration = pipeline.lock().update_controls(&controls);
        self.registry.mark_active(&payload.stream_id);
        Ok(json!({ "calibration": calibration }))
    }

    /// Whole-array update when `eq` is a valid array, else a single band
    pub fn update_eq(&self, payload: UpdateEqPayload) -> Result<Value> {
        let pipeline = self.registry.require(&payload.stream_id)?;

        if let Some(gains) = payload.eq.as_ref().and_then(|eq| validate_eq_array(eq).ok()) {
            pipeline.lock().update_eq_all(&gains)?;
            self.registry.mark_active(&payload.stream_id);
            return Ok(json!({ "mode": "all" }));
        }

        let index = payload.index.as_ref().and_then(Value::as_f64);
        let value = payload.value.as_ref().and_then(Value::as_f64);
        match (index, value) {
            (Some(index), Some(value)) => {
                let band = band_index(index)?;
                pipeline.lock().update_eq_band(band, value as f32)?;
                self.registry.mark_active(&payload.stream_id);
                Ok(json!({ "mode": "single", "index": band }))
            }
            _ => Err(AurisError::invalid_payload("Invalid EQ update payload")),
        }
    }

    pub fn toggle_effect(&self, payload: ToggleEffectPayload) -> Result<Value> {
        let pipeline = self.registry.require(&payload.stream_id)?;
        let kind: EffectKind = payload.name.parse()?;
        let chain = {
            let mut pipeline = pipeline.lock();
            pipeline.set_effect_active(kind, payload.active);
            pipeline.effect_chain()
        };
        self.registry.mark_active(&payload.stream_id);
        Ok(json!({ "chain": chain }))
    }

    pub fn update_effect_params(&self, payload: EffectParamsPayload) -> Result<Value> {
        let pipeline = self.registry.require(&payload.stream_id)?;
        let kind: EffectKind = payload.name.parse()?;
        pipeline.lock().update_effect_params(kind, &payload.params);
        self.registry.mark_active(&payload.stream_id);
        Ok(json!({}))
    }

    /// Idempotent; an unknown stream reports `skipped`
    pub fn close_context(&self, payload: StreamPayload) -> Value {
        if self.registry.close(&payload.stream_id) {
            json!({})
        } else {
            json!({ "skipped": true })
        }
    }

    pub fn close_all_contexts(&self) -> Value {
        json!({ "closed": self.registry.close_all() })
    }

    pub fn resolve_active_stream_id(&self) -> Result<Value> {
        let stream_id = self.registry.resolve_active()?;
        Ok(json!({ "streamId": stream_id }))
    }

    pub fn request_status(&self, payload: StreamPayload) -> Result<Value> {
        Ok(serde_json::to_value(self.registry.status(&payload.stream_id))?)
    }
}

fn parse_eq(eq: Option<&Value>) -> Result<Option<[f32; EQ_BANDS]>> {
    eq.map(validate_eq_array).transpose()
}

fn band_index(index: f64) -> Result<usize> {
    if index.fract() == 0.0 && (0.0..EQ_BANDS as f64).contains(&index) {
        Ok(index as usize)
    } else {
        Err(AurisError::InvalidParameter {
            param: "index".to_string(),
            value: index.to_string(),
            expected: format!("an integer band index 0 to {}", EQ_BANDS - 1),
        })
    }
}

/// `{ok: true}` merged with the handler's body
pub fn ok_response(body: Value) -> Value {
    let mut response = Map::new();
    response.insert("ok".to_string(), Value::Bool(true));
    if let Value::Object(fields) = body {
        response.extend(fields);
    }
    Value::Object(response)
}

/// `{ok: false, error, code, message}`; `message` is the UI status text
pub fn error_response(error: &AurisError) -> Value {
    json!({
        "ok": false,
        "error": error.to_string(),
        "code": error.error_code(),
        "message": error.friendly_message(),
    })
}
