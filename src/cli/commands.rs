//! CLI Command Implementations

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;

use super::RenderArgs;
use crate::config::EngineConfig;
use crate::dsp::{calculate_gain_staging, Calibration, ControlSettings, GainStaging};
use crate::error::Result;
use crate::orchestrator::{Orchestrator, StreamStatus, WavFileProvider};

/// Stream identifier used for offline renders
const RENDER_STREAM: &str = "cli";

/// Result of an offline render
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSummary {
    pub frames: usize,
    pub duration_secs: f64,
    pub chain: Value,
    pub status: StreamStatus,
}

/// Render a WAV file through the event surface, the way a browser tab would drive it
pub async fn render(args: &RenderArgs) -> Result<RenderSummary> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    info!("Rendering {} -> {}", args.input.display(), args.output.display());

    let provider = WavFileProvider::new(&args.input, Some(args.output.clone()), config.sample_rate);
    let orchestrator = Orchestrator::new(Arc::new(provider), config.clone());

    orchestrator
        .handle(
            "applySettings",
            json!({ "streamId": RENDER_STREAM, "settings": settings_payload(args) }),
        )
        .await?;

    let mut chain = Value::Array(Vec::new());
    for effect in &args.effects {
        let response = orchestrator
            .handle(
                "toggleEffect",
                json!({ "streamId": RENDER_STREAM, "name": effect, "active": true }),
            )
            .await?;
        chain = response["chain"].clone();
    }

    // Drive the pipeline the way the scheduler would, without real-time pacing
    let pipeline = orchestrator.registry().require(RENDER_STREAM)?;
    let period_ms = config.scheduler_period_ms as f64;
    let mut frames = 0;
    loop {
        let mut pipeline = pipeline.lock();
        if pipeline.is_source_ended() {
            break;
        }
        frames += pipeline.pump(period_ms)?;
    }

    let status = orchestrator.registry().status(RENDER_STREAM);
    orchestrator
        .handle("closeContext", json!({ "streamId": RENDER_STREAM }))
        .await?;

    let summary = RenderSummary {
        frames,
        duration_secs: frames as f64 / config.sample_rate as f64,
        chain,
        status,
    };
    println!("Rendered: {}", args.output.display());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary)
}

fn settings_payload(args: &RenderArgs) -> Value {
    let mut settings = Map::new();
    if let Some(gain) = args.gain {
        settings.insert("gain".to_string(), json!(gain));
    }
    if let Some(eq) = &args.eq {
        settings.insert("eq".to_string(), json!(eq));
    }
    if let Some(volume) = args.volume {
        settings.insert("volumeBoost".to_string(), json!(volume));
    }
    if let Some(bass) = args.bass {
        settings.insert("bassBoost".to_string(), json!(bass));
    }
    if let Some(voice) = args.voice {
        settings.insert("voiceBoost".to_string(), json!(voice));
    }
    Value::Object(settings)
}

/// Gain staging and guard calibration for a tone setting
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingReport {
    pub staging: GainStaging,
    pub calibration: Calibration,
}

pub fn staging(volume: f32, bass: f32) -> Result<StagingReport> {
    let tone = ControlSettings {
        volume_boost: Some(volume),
        bass_boost: Some(bass),
        voice_boost: None,
    };
    let report = StagingReport {
        staging: calculate_gain_staging(tone.volume_factor()),
        calibration: Calibration::from_tone(&tone),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report)
}
