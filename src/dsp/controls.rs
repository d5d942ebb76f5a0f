//! Tone controls and gain staging
//!
//! Signal flow:
//! ```text
//! sub-bass peak (40 Hz) → bass shelf (100 Hz) → voice peak (1 kHz) → pre gain → volume gain
//! ```
//!
//! The volume boost (1x to 8x) is split between the pre and volume stages so
//! neither stage needs an extreme value.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AudioNode, BiquadFilter, GainNode};
use crate::engine::{AudioBuffer, AudioParam};

const SUB_BASS_FREQ: f32 = 40.0;
const SUB_BASS_Q: f32 = 2.0;
const BASS_FREQ: f32 = 100.0;
const VOICE_FREQ: f32 = 1000.0;
const VOICE_Q: f32 = 1.2;

const BASS_RANGE_DB: f32 = 20.0;
const VOICE_RANGE_DB: f32 = 12.0;
const SUB_BASS_CAP_DB: f32 = 12.0;
const MIN_VOLUME_PERCENT: f32 = 100.0;
const MAX_VOLUME_PERCENT: f32 = 800.0;

const FILTER_TIME_CONSTANT: f64 = 0.05;
const STAGE_TIME_CONSTANT: f64 = 0.02;
const BASS_TRIM_TIME_CONSTANT: f64 = 0.1;

/// Tone settings; absent fields leave the current state untouched
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSettings {
    /// Volume in percent (100 to 800)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_boost: Option<f32>,
    /// Bass shelf gain in dB (-20 to 20)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bass_boost: Option<f32>,
    /// Voice presence gain in dB (-12 to 12)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_boost: Option<f32>,
}

impl ControlSettings {
    pub fn is_empty(&self) -> bool {
        self.volume_boost.is_none() && self.bass_boost.is_none() && self.voice_boost.is_none()
    }

    /// Overlay the fields present in `other`
    pub fn merge(&mut self, other: &ControlSettings) {
        if other.volume_boost.is_some() {
            self.volume_boost = other.volume_boost;
        }
        if other.bass_boost.is_some() {
            self.bass_boost = other.bass_boost;
        }
        if other.voice_boost.is_some() {
            self.voice_boost = other.voice_boost;
        }
    }

    /// Volume as a linear factor, 1.0 to 8.0
    pub fn volume_factor(&self) -> f32 {
        self.volume_boost
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(MIN_VOLUME_PERCENT, MAX_VOLUME_PERCENT) / 100.0)
            .unwrap_or(1.0)
    }

    /// Bass gain in dB after clamping; 0 when never set
    pub fn bass_db(&self) -> f32 {
        self.bass_boost
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(-BASS_RANGE_DB, BASS_RANGE_DB))
            .unwrap_or(0.0)
    }
}

/// Split of the volume factor across the two gain stages
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GainStaging {
    pub pre_gain: f32,
    pub main_gain: f32,
}

/// Distribute a volume factor between the pre and main stages
///
/// # Arguments
/// * `factor` - Linear volume factor (1.0 to 8.0)
///
/// # Returns
/// Stage gains whose product equals `factor`
pub fn calculate_gain_staging(factor: f32) -> GainStaging {
    let pre_gain = if factor <= 2.0 {
        1.0
    } else if factor <= 4.0 {
        (factor * 0.85).sqrt().min(1.3)
    } else if factor <= 6.0 {
        1.5
    } else {
        let ratio = ((factor - 6.0) / 2.0).min(1.0);
        1.4 - 0.3 * ratio
    };
    GainStaging {
        pre_gain,
        main_gain: factor / pre_gain,
    }
}

/// Sub-bass gain derived from the bass gain
///
/// The sub band tracks the bass shelf at a fraction that shrinks as bass
/// rises, capped at 12 dB.
pub fn sub_bass_gain(bass_db: f32) -> f32 {
    let scale = if bass_db >= 12.0 {
        0.72
    } else if bass_db >= 8.0 {
        0.78
    } else {
        0.82
    };
    (bass_db * scale).min(SUB_BASS_CAP_DB)
}

/// Headroom multiplier for the pre stage
pub fn bass_load_factor(bass_db: f32, factor: f32) -> f32 {
    let mut load = if bass_db >= 12.0 {
        0.85
    } else if bass_db >= 8.0 {
        0.92
    } else {
        1.0
    };
    if bass_db <= 0.0 && factor >= 6.0 {
        let extra = ((factor - 6.0) / 2.0).min(1.0) * 0.06;
        load *= 1.0 - extra;
    }
    load
}

/// Tone shaping and volume staging
pub trait ToneControls: Send {
    /// Apply the fields present in `settings`
    fn apply_controls(&mut self, settings: &ControlSettings, now: f64);

    /// Every setting applied so far, merged
    fn tone_state(&self) -> ControlSettings;
}

/// Filter and gain chain behind the tone controls
#[derive(Debug, Clone)]
pub struct ToneStack {
    sub_bass: BiquadFilter,
    bass: BiquadFilter,
    voice: BiquadFilter,
    pre: GainNode,
    volume: GainNode,
    state: ControlSettings,
}

impl ToneStack {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sub_bass: BiquadFilter::peaking(SUB_BASS_FREQ, SUB_BASS_Q, sample_rate),
            bass: BiquadFilter::low_shelf(BASS_FREQ, sample_rate),
            voice: BiquadFilter::peaking(VOICE_FREQ, VOICE_Q, sample_rate),
            pre: GainNode::new(1.0, sample_rate),
            volume: GainNode::new(1.0, sample_rate),
            state: ControlSettings::default(),
        }
    }

    pub fn sub_bass_gain(&self) -> &AudioParam {
        &self.sub_bass.gain
    }

    pub fn bass_gain(&self) -> &AudioParam {
        &self.bass.gain
    }

    pub fn voice_gain(&self) -> &AudioParam {
        &self.voice.gain
    }

    pub fn pre_gain(&self) -> &AudioParam {
        &self.pre.gain
    }

    pub fn volume_gain(&self) -> &AudioParam {
        &self.volume.gain
    }
}

impl ToneControls for ToneStack {
    fn apply_controls(&mut self, settings: &ControlSettings, now: f64) {
        self.state.merge(settings);

        if settings.bass_boost.is_some_and(f32::is_finite) {
            let bass = self.state.bass_db();
            self.bass.gain.set_target_at_time(bass, now, FILTER_TIME_CONSTANT);
            self.sub_bass
                .gain
                .set_target_at_time(sub_bass_gain(bass), now, FILTER_TIME_CONSTANT);
        }

        if let Some(voice) = settings.voice_boost.filter(|v| v.is_finite()) {
            let voice = voice.clamp(-VOICE_RANGE_DB, VOICE_RANGE_DB);
            self.voice.gain.set_target_at_time(voice, now, FILTER_TIME_CONSTANT);
        }

        if settings.volume_boost.is_some_and(f32::is_finite) {
            let factor = self.state.volume_factor();
            let bass = self.state.bass_db();
            let staging = calculate_gain_staging(factor);
            let pre = staging.pre_gain * bass_load_factor(bass, factor);

            self.pre.gain.set_target_at_time(pre, now, STAGE_TIME_CONSTANT);
            self.volume
                .gain
                .set_target_at_time(staging.main_gain, now, STAGE_TIME_CONSTANT);

            // Extreme boosts pull the bass shelf back 1 dB so the compressor stays calm
            if factor > 4.0 && bass > 10.0 {
                let trimmed = bass.min(18.0) - 1.0;
                self.bass
                    .gain
                    .set_target_at_time(trimmed, now, BASS_TRIM_TIME_CONSTANT);
            }

            debug!(
                factor,
                pre_gain = pre,
                main_gain = staging.main_gain,
                "Tone controls staged"
            );
        }
    }

    fn tone_state(&self) -> ControlSettings {
        self.state
    }
}

impl AudioNode for ToneStack {
    fn process(&mut self, buffer: &mut AudioBuffer, start_time: f64) {
        self.sub_bass.process(buffer, start_time);
        self.bass.process(buffer, start_time);
        self.voice.process(buffer, start_time);
        self.pre.process(buffer, start_time);
        self.volume.process(buffer, start_time);
    }

    fn reset(&mut self) {
        self.sub_bass.reset();
        self.bass.reset();
        self.voice.reset();
    }
}
