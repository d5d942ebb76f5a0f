//! Pipeline assembly and per-pipeline control
//!
//! One [`Pipeline`] per captured stream:
//! ```text
//! source → tone controls → equalizer → dynamics guard → effects → master gain → sink
//!                                                                      └─→ RMS meter
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::telemetry::RmsMeter;
use crate::config::EngineConfig;
use crate::dsp::effects::{EffectKind, EffectParams, EffectsMixer, EffectsRouter};
use crate::dsp::{
    AntiDistortion, AudioNode, Calibration, ControlSettings, DynamicsGuard, Equalizer,
    GainNode, GraphicEqualizer, ToneControls, ToneStack, EQ_BANDS,
};
use crate::engine::{
    AudioBuffer, AudioGraphHandle, AudioParam, AudioSink, ChannelLayout, MediaStream,
    StreamSource,
};
use crate::error::Result;

const MASTER_TIME_CONSTANT: f64 = 0.05;

/// Most audio one scheduler tick may render, in scheduler periods
const MAX_PUMP_PERIODS: u64 = 4;

/// Settings a pipeline starts with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineParams {
    /// Master gain (linear)
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<[f32; EQ_BANDS]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controls: Option<ControlSettings>,
}

fn default_gain() -> f32 {
    1.0
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            gain: default_gain(),
            eq: None,
            controls: None,
        }
    }
}

/// The assembled processing graph for one stream
pub struct Pipeline {
    stream_id: String,
    handle: AudioGraphHandle,
    source: Box<dyn StreamSource>,
    sink: Box<dyn AudioSink>,
    controls: ToneStack,
    eq: GraphicEqualizer,
    guard: AntiDistortion,
    effects: EffectsMixer,
    master: GainNode,
    meter: RmsMeter,
    block: AudioBuffer,
    /// Fractional frames owed by the scheduler
    frame_debt: f64,
    /// Cap on frames rendered by one `pump`
    max_pump_frames: f64,
    closed: bool,
}

impl Pipeline {
    /// Build a pipeline around opened media and apply the initial settings
    ///
    /// # Arguments
    /// * `stream_id` - Capture stream the pipeline belongs to
    /// * `media` - Source and sink for the stream
    /// * `params` - Initial master gain, EQ and tone settings
    /// * `config` - Engine sample rate, render quantum and meter window
    pub fn build(
        stream_id: impl Into<String>,
        media: MediaStream,
        params: &PipelineParams,
        config: &EngineConfig,
    ) -> Result<Self> {
        let sample_rate = config.sample_rate;
        let handle = AudioGraphHandle::new(sample_rate, config.render_quantum);

        let mut pipeline = Self {
            stream_id: stream_id.into(),
            source: media.source,
            sink: media.sink,
            controls: ToneStack::new(sample_rate),
            eq: GraphicEqualizer::new(sample_rate),
            guard: AntiDistortion::new(sample_rate),
            effects: EffectsMixer::new(sample_rate),
            master: GainNode::new(params.gain.max(0.0), sample_rate),
            meter: RmsMeter::new(config.meter_window),
            block: AudioBuffer::with_sample_rate(
                handle.render_quantum(),
                ChannelLayout::Stereo,
                sample_rate,
            ),
            handle,
            frame_debt: 0.0,
            max_pump_frames: (MAX_PUMP_PERIODS * config.scheduler_period_ms * sample_rate as u64)
                as f64
                / 1000.0,
            closed: false,
        };

        if let Some(gains) = &params.eq {
            pipeline.update_eq_all(gains)?;
        }
        if let Some(controls) = &params.controls {
            pipeline.update_controls(controls);
        }

        info!(
            stream_id = %pipeline.stream_id,
            graph = %pipeline.handle.id(),
            sample_rate,
            "Pipeline built"
        );
        Ok(pipeline)
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn handle(&self) -> &AudioGraphHandle {
        &self.handle
    }

    /// True once the pipeline or its graph handle is closed
    pub fn is_closed(&self) -> bool {
        self.closed || self.handle.is_closed()
    }

    /// True once the source has nothing left to play
    pub fn is_source_ended(&self) -> bool {
        self.source.is_ended()
    }

    fn now(&self) -> f64 {
        self.handle.current_time()
    }

    // ========================================================================
    // Control surface
    // ========================================================================

    /// Glide the master gain to `max(0, value)`
    pub fn update_gain(&mut self, value: f32) {
        let now = self.now();
        let gain = if value.is_finite() { value.max(0.0) } else { 0.0 };
        self.master
            .gain
            .set_target_at_time(gain, now, MASTER_TIME_CONSTANT);
    }

    pub fn update_eq_band(&mut self, index: usize, gain_db: f32) -> Result<()> {
        let now = self.now();
        self.eq.set_band(index, gain_db, now)
    }

    pub fn update_eq_all(&mut self, gains: &[f32; EQ_BANDS]) -> Result<()> {
        let now = self.now();
        self.eq.set_all(gains, now)
    }

    /// Apply tone settings and recalibrate the dynamics guard from the merged tone state
    pub fn update_controls(&mut self, settings: &ControlSettings) -> Calibration {
        let now = self.now();
        self.controls.apply_controls(settings, now);
        self.guard.calibrate(&self.controls.tone_state(), now)
    }

    pub fn set_effect_active(&mut self, kind: EffectKind, active: bool) {
        let now = self.now();
        self.effects.set_effect_active(kind, active, now);
    }

    pub fn update_effect_params(&mut self, kind: EffectKind, params: &EffectParams) {
        let now = self.now();
        self.effects.update_effect_params(kind, params, now);
    }

    /// RMS of the latest analysis window of the master output
    pub fn rms(&self) -> f32 {
        self.meter.rms()
    }

    pub fn effect_chain(&self) -> Vec<EffectKind> {
        self.effects.chain()
    }

    pub fn controls(&self) -> &ToneStack {
        &self.controls
    }

    pub fn equalizer(&self) -> &GraphicEqualizer {
        &self.eq
    }

    pub fn guard(&self) -> &AntiDistortion {
        &self.guard
    }

    pub fn effects(&self) -> &EffectsMixer {
        &self.effects
    }

    pub fn master_gain(&self) -> &AudioParam {
        &self.master.gain
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Render `frames` frames from the source into the sink
    ///
    /// # Returns
    /// Frames rendered; zero once closed
    pub fn render(&mut self, frames: usize) -> Result<usize> {
        if self.is_closed() {
            return Ok(0);
        }
        let quantum = self.handle.render_quantum();
        let mut rendered = 0;
        while rendered < frames {
            let n = quantum.min(frames - rendered);
            let start_time = self.now();

            self.block.resize(n);
            self.source.read(&mut self.block);
            self.controls.process(&mut self.block, start_time);
            self.eq.process(&mut self.block, start_time);
            self.guard.process(&mut self.block, start_time);
            self.effects.process(&mut self.block, start_time);
            self.master.process(&mut self.block, start_time);

            self.meter.push(&self.block);
            self.sink.write(&self.block)?;

            self.handle.advance(n);
            rendered += n;
        }
        Ok(rendered)
    }

    /// Scheduler tick: render the audio that elapsed and advance effect animation
    ///
    /// After a stall the backlog beyond a few scheduler periods is dropped.
    pub fn pump(&mut self, delta_ms: f64) -> Result<usize> {
        if self.is_closed() {
            return Ok(0);
        }
        self.frame_debt += delta_ms.max(0.0) / 1000.0 * self.handle.sample_rate() as f64;
        if self.frame_debt > self.max_pump_frames {
            debug!(
                stream_id = %self.stream_id,
                dropped = self.frame_debt - self.max_pump_frames,
                "Scheduler fell behind, dropping backlog"
            );
            self.frame_debt = self.max_pump_frames;
        }
        let frames = self.frame_debt.floor();
        self.frame_debt -= frames;
        let rendered = self.render(frames as usize)?;
        self.effects.step(delta_ms);
        Ok(rendered)
    }

    /// Release media and close the graph handle
    ///
    /// Safe to call repeatedly. Sink flush failures are logged and swallowed.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.source.close();
        if let Err(e) = self.sink.finish() {
            debug!(stream_id = %self.stream_id, error = %e, "Sink finish failed during close");
        }
        self.handle.close();
        info!(stream_id = %self.stream_id, "Pipeline closed");
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stream_id", &self.stream_id)
            .field("graph", &self.handle.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
