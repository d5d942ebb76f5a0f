//! Anti-distortion dynamics guard
//!
//! Main path:
//! ```text
//! pre-trim shelf → compressor → [soft clip] → limiter → makeup → bass restore → presence → final
//! ```
//! A parallel punch path leaves the pre-trim output through a 50 Hz high-pass
//! and an 80 Hz peak, and sums back in ahead of the makeup gain.
//!
//! [`AntiDistortion::calibrate`] re-tunes every stage from the volume factor
//! and bass gain, then reconciles the wiring: the soft-clip shaper is only
//! in the main path in the upper part of the third loudness tier.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    soft_clip_curve, AudioNode, BiquadFilter, CompressorSettings, ControlSettings,
    DynamicsCompressor, GainNode, Oversample, WaveShaper,
};
use crate::engine::{AudioBuffer, AudioParam, ChannelLayout, Topology, Wiring};

const PRE_TRIM_FREQ: f32 = 55.0;
const BASS_RESTORE_FREQ: f32 = 80.0;
const PRESENCE_FREQ: f32 = 4800.0;
const PUNCH_HIGH_PASS_FREQ: f32 = 50.0;
const PUNCH_PEAK_FREQ: f32 = 80.0;
const PUNCH_PEAK_Q: f32 = 1.0;

/// Bass gain from which a signal counts as bass-heavy, in dB
const BASS_HEAVY_DB: f32 = 10.0;

/// Volume factor above which the third tier inserts the soft clipper
const SHAPER_FACTOR: f32 = 5.2;

const MAKEUP_TIME_CONSTANT: f64 = 0.08;
const PRESENCE_TIME_CONSTANT: f64 = 0.15;
const FINAL_TIME_CONSTANT: f64 = 0.12;
const TRIM_TIME_CONSTANT: f64 = 0.08;
const RESTORE_TIME_CONSTANT: f64 = 0.12;
const PUNCH_TIME_CONSTANT: f64 = 0.05;

const BASE_COMPRESSOR: CompressorSettings = CompressorSettings::new(-6.0, 10.0, 6.0, 0.003, 0.12);
const BASE_LIMITER: CompressorSettings = CompressorSettings::new(-0.7, 1.0, 14.0, 0.001, 0.06);

/// Loudness tier selected by the volume factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoudnessTier {
    /// Up to 2x
    Gentle,
    /// Up to 4x
    Moderate,
    /// Up to 6x
    Loud,
    /// Above 6x
    Extreme,
}

impl LoudnessTier {
    /// Upper bounds are inclusive: exactly 2x is still gentle
    pub fn for_factor(factor: f32) -> Self {
        if factor <= 2.0 {
            LoudnessTier::Gentle
        } else if factor <= 4.0 {
            LoudnessTier::Moderate
        } else if factor <= 6.0 {
            LoudnessTier::Loud
        } else {
            LoudnessTier::Extreme
        }
    }
}

/// Every stage target derived from one tone state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calibration {
    pub factor: f32,
    pub loud_intensity: f32,
    pub bass_db: f32,
    pub bass_heavy: bool,
    pub tier: LoudnessTier,
    pub compressor: CompressorSettings,
    pub limiter: CompressorSettings,
    pub shaper_active: bool,
    pub makeup: f32,
    pub presence_db: f32,
    pub final_gain: f32,
    pub trim_db: f32,
    pub restore_db: f32,
    pub punch_mix: f32,
    pub punch_peak_db: f32,
}

impl Calibration {
    /// Compute the guard profile for a tone state
    ///
    /// Missing volume counts as 1x and missing bass as 0 dB.
    pub fn from_tone(tone: &ControlSettings) -> Self {
        let factor = tone.volume_factor();
        let bass_db = tone.bass_db();
        let bass_heavy = bass_db >= BASS_HEAVY_DB;
        let loud_intensity = ((factor - 1.0) / 7.0).min(1.0);
        let bass_norm = (bass_db / 20.0).clamp(0.0, 1.0);

        let (trim_db, restore_db) = if bass_db > 0.0 {
            (
                -(bass_db * (0.32 + 0.14 * loud_intensity)).min(8.0),
                (bass_db * (0.48 - 0.18 * loud_intensity)).min(10.0).max(0.0),
            )
        } else if loud_intensity > 0.0 {
            (-loud_intensity * 1.5, 0.0)
        } else {
            (0.0, 0.0)
        };

        let mut punch_mix = (bass_norm * 0.35 + loud_intensity * 0.2).min(0.4);
        if loud_intensity > 0.75 {
            punch_mix *= 0.85;
        }

        let tier = LoudnessTier::for_factor(factor);
        let pick = |heavy: f32, normal: f32| if bass_heavy { heavy } else { normal };
        let (compressor, limiter, shaper_active, makeup) = match tier {
            LoudnessTier::Gentle => (
                CompressorSettings::new(-6.0, 10.0, 4.8, 0.004, 0.12),
                CompressorSettings::new(-0.9, 1.0, 11.0, 0.001, 0.06),
                false,
                1.03,
            ),
            LoudnessTier::Moderate => (
                CompressorSettings::new(pick(-7.5, -8.5), 9.0, pick(6.0, 6.5), 0.0036, 0.14),
                CompressorSettings::new(-0.85, 1.0, 12.5, 0.001, 0.065),
                false,
                pick(1.06, 1.08),
            ),
            LoudnessTier::Loud => (
                CompressorSettings::new(pick(-8.8, -9.5), 8.0, pick(7.5, 8.2), 0.0033, 0.18),
                CompressorSettings::new(-0.95, 1.0, 15.0, 0.001, 0.075),
                factor > SHAPER_FACTOR,
                pick(1.08, 1.1),
            ),
            LoudnessTier::Extreme => {
                punch_mix = punch_mix.min(0.32);
                (
                    CompressorSettings::new(pick(-9.5, -10.5), 7.0, pick(8.0, 8.8), 0.0035, 0.22),
                    CompressorSettings::new(-1.25, 0.8, 18.0, 0.001, 0.09),
                    false,
                    pick(1.05, 1.08),
                )
            }
        };

        let mut presence_db = (loud_intensity * 4.0).min(4.5);
        if bass_heavy {
            presence_db *= 0.8;
        }
        if factor >= 6.5 {
            presence_db *= 0.75;
        }

        let mut final_gain = (1.0 + loud_intensity * 0.32).min(1.35);
        if shaper_active {
            final_gain *= 0.92;
        }
        if bass_heavy {
            final_gain *= 0.92;
        }

        Self {
            factor,
            loud_intensity,
            bass_db,
            bass_heavy,
            tier,
            compressor,
            limiter,
            shaper_active,
            makeup,
            presence_db,
            final_gain,
            trim_db,
            restore_db,
            punch_mix,
            punch_peak_db: punch_mix * 12.0,
        }
    }
}

/// Adaptive protection against clipping at high boost
pub trait DynamicsGuard: Send {
    /// Re-tune every stage for the given tone state
    fn calibrate(&mut self, tone: &ControlSettings, now: f64) -> Calibration;
}

/// Nodes of the guard graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum GuardNode {
    PreTrim,
    Compressor,
    Shaper,
    Limiter,
    Makeup,
    BassRestore,
    Presence,
    Final,
    PunchHighPass,
    PunchPeak,
    PunchGain,
}

/// Wiring for a given shaper state
fn guard_topology(shaper_active: bool) -> Topology<GuardNode> {
    use GuardNode::*;
    let mut topology = Topology::new();
    if shaper_active {
        topology.chain(&[PreTrim, Compressor, Shaper, Limiter]);
    } else {
        topology.chain(&[PreTrim, Compressor, Limiter]);
    }
    topology
        .chain(&[Limiter, Makeup, BassRestore, Presence, Final])
        .chain(&[PreTrim, PunchHighPass, PunchPeak, PunchGain, Makeup]);
    topology
}

fn shared_soft_clip_curve() -> Arc<[f32]> {
    static CURVE: OnceLock<Arc<[f32]>> = OnceLock::new();
    CURVE.get_or_init(|| Arc::from(soft_clip_curve())).clone()
}

/// Compressor, limiter and shaping stages with a parallel punch path
#[derive(Debug, Clone)]
pub struct AntiDistortion {
    pre_trim: BiquadFilter,
    compressor: DynamicsCompressor,
    shaper: WaveShaper,
    limiter: DynamicsCompressor,
    makeup: GainNode,
    bass_restore: BiquadFilter,
    presence: BiquadFilter,
    final_gain: GainNode,
    punch_high_pass: BiquadFilter,
    punch_peak: BiquadFilter,
    punch_gain: GainNode,
    wiring: Wiring<GuardNode>,
    punch_buffer: AudioBuffer,
    calibration: Option<Calibration>,
}

impl AntiDistortion {
    /// Build the guard with its base profile and the shaper bypassed
    pub fn new(sample_rate: u32) -> Self {
        let mut compressor = DynamicsCompressor::new(sample_rate);
        compressor.apply(&BASE_COMPRESSOR);
        let mut limiter = DynamicsCompressor::new(sample_rate);
        limiter.apply(&BASE_LIMITER);

        let mut guard = Self {
            pre_trim: BiquadFilter::low_shelf(PRE_TRIM_FREQ, sample_rate),
            compressor,
            shaper: WaveShaper::new(),
            limiter,
            makeup: GainNode::new(1.0, sample_rate),
            bass_restore: BiquadFilter::low_shelf(BASS_RESTORE_FREQ, sample_rate),
            presence: BiquadFilter::high_shelf(PRESENCE_FREQ, sample_rate),
            final_gain: GainNode::new(1.0, sample_rate),
            punch_high_pass: BiquadFilter::high_pass(PUNCH_HIGH_PASS_FREQ, sample_rate),
            punch_peak: BiquadFilter::peaking(PUNCH_PEAK_FREQ, PUNCH_PEAK_Q, sample_rate),
            punch_gain: GainNode::new(0.0, sample_rate),
            wiring: Wiring::new(),
            punch_buffer: AudioBuffer::with_sample_rate(0, ChannelLayout::Stereo, sample_rate),
            calibration: None,
        };
        guard.wiring.reconcile(guard_topology(false));
        guard
    }

    /// Last calibration applied, if any
    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    /// True when the soft clipper sits in the main path
    pub fn shaper_inline(&self) -> bool {
        self.wiring
            .current()
            .contains(GuardNode::Compressor, GuardNode::Shaper)
    }

    pub fn compressor(&self) -> &DynamicsCompressor {
        &self.compressor
    }

    pub fn limiter(&self) -> &DynamicsCompressor {
        &self.limiter
    }

    pub fn makeup_gain(&self) -> &AudioParam {
        &self.makeup.gain
    }

    pub fn final_gain(&self) -> &AudioParam {
        &self.final_gain.gain
    }

    pub fn presence_gain(&self) -> &AudioParam {
        &self.presence.gain
    }

    pub fn trim_gain(&self) -> &AudioParam {
        &self.pre_trim.gain
    }

    pub fn restore_gain(&self) -> &AudioParam {
        &self.bass_restore.gain
    }

    pub fn punch_gain(&self) -> &AudioParam {
        &self.punch_gain.gain
    }
}

impl DynamicsGuard for AntiDistortion {
    fn calibrate(&mut self, tone: &ControlSettings, now: f64) -> Calibration {
        let cal = Calibration::from_tone(tone);

        self.compressor.apply(&cal.compressor);
        self.limiter.apply(&cal.limiter);
        if cal.shaper_active {
            self.shaper.set_curve(Some(shared_soft_clip_curve()));
            self.shaper.set_oversample(Oversample::X4);
        }

        self.makeup
            .gain
            .set_target_at_time(cal.makeup, now, MAKEUP_TIME_CONSTANT);
        self.presence
            .gain
            .set_target_at_time(cal.presence_db, now, PRESENCE_TIME_CONSTANT);
        self.final_gain
            .gain
            .set_target_at_time(cal.final_gain, now, FINAL_TIME_CONSTANT);
        self.pre_trim
            .gain
            .set_target_at_time(cal.trim_db, now, TRIM_TIME_CONSTANT);
        self.bass_restore
            .gain
            .set_target_at_time(cal.restore_db, now, RESTORE_TIME_CONSTANT);
        self.punch_peak
            .gain
            .set_target_at_time(cal.punch_peak_db, now, PUNCH_TIME_CONSTANT);
        self.punch_gain
            .gain
            .set_target_at_time(cal.punch_mix, now, PUNCH_TIME_CONSTANT);

        let diff = self.wiring.reconcile(guard_topology(cal.shaper_active));
        if !diff.is_empty() {
            debug!(
                shaper = cal.shaper_active,
                removed = diff.removed.len(),
                added = diff.added.len(),
                "Dynamics guard rewired"
            );
        }
        debug!(
            factor = cal.factor,
            bass_db = cal.bass_db,
            tier = ?cal.tier,
            "Dynamics guard calibrated"
        );

        self.calibration = Some(cal);
        cal
    }
}

impl AudioNode for AntiDistortion {
    fn process(&mut self, buffer: &mut AudioBuffer, start_time: f64) {
        self.pre_trim.process(buffer, start_time);

        let topology = self.wiring.current();
        let punch = topology.contains(GuardNode::PunchGain, GuardNode::Makeup);
        let shaper = topology.contains(GuardNode::Compressor, GuardNode::Shaper);

        if punch {
            self.punch_buffer.copy_from(buffer);
            self.punch_high_pass.process(&mut self.punch_buffer, start_time);
            self.punch_peak.process(&mut self.punch_buffer, start_time);
            self.punch_gain.process(&mut self.punch_buffer, start_time);
        }

        self.compressor.process(buffer, start_time);
        if shaper {
            self.shaper.process(buffer, start_time);
        }
        self.limiter.process(buffer, start_time);

        if punch {
            buffer.mix_from(&self.punch_buffer, 1.0);
        }
        self.makeup.process(buffer, start_time);
        self.bass_restore.process(buffer, start_time);
        self.presence.process(buffer, start_time);
        self.final_gain.process(buffer, start_time);
    }

    fn reset(&mut self) {
        self.pre_trim.reset();
        self.compressor.reset();
        self.shaper.reset();
        self.limiter.reset();
        self.bass_restore.reset();
        self.presence.reset();
        self.punch_high_pass.reset();
        self.punch_peak.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_util::{create_sine_buffer, render};
    use approx::assert_relative_eq;

    fn tone(volume: f32, bass: f32) -> ControlSettings {
        ControlSettings {
            volume_boost: Some(volume),
            bass_boost: Some(bass),
            voice_boost: None,
        }
    }

    #[test]
    fn test_base_profile() {
        let guard = AntiDistortion::new(48000);
        assert_eq!(guard.compressor().settings(), BASE_COMPRESSOR);
        assert_eq!(guard.limiter().settings(), BASE_LIMITER);
        assert!(!guard.shaper_inline());
        assert!(guard.calibration().is_none());
    }

    #[test]
    fn test_tier_boundaries_are_inclusive() {
        assert_eq!(LoudnessTier::for_factor(2.0), LoudnessTier::Gentle);
        assert_eq!(LoudnessTier::for_factor(2.01), LoudnessTier::Moderate);
        assert_eq!(LoudnessTier::for_factor(4.0), LoudnessTier::Moderate);
        assert_eq!(LoudnessTier::for_factor(6.0), LoudnessTier::Loud);
        assert_eq!(LoudnessTier::for_factor(6.01), LoudnessTier::Extreme);
    }

    #[test]
    fn test_defaults_without_tone() {
        let cal = Calibration::from_tone(&ControlSettings::default());
        assert_eq!(cal.factor, 1.0);
        assert_eq!(cal.tier, LoudnessTier::Gentle);
        assert_eq!(cal.trim_db, 0.0);
        assert_eq!(cal.restore_db, 0.0);
        assert_eq!(cal.punch_mix, 0.0);
        assert_eq!(cal.final_gain, 1.0);
        assert_eq!(cal.makeup, 1.03);
    }

    #[test]
    fn test_moderate_bass_heavy() {
        let cal = Calibration::from_tone(&tone(300.0, 10.0));
        let l = 2.0 / 7.0;
        assert!(cal.bass_heavy);
        assert_eq!(cal.compressor.threshold, -7.5);
        assert_eq!(cal.compressor.ratio, 6.0);
        assert_eq!(cal.makeup, 1.06);
        assert_relative_eq!(cal.trim_db, -10.0 * (0.32 + 0.14 * l), epsilon = 1e-5);
        assert_relative_eq!(cal.restore_db, 10.0 * (0.48 - 0.18 * l), epsilon = 1e-5);
        assert_relative_eq!(cal.punch_mix, 0.5 * 0.35 + l * 0.2, epsilon = 1e-5);
        assert_relative_eq!(cal.presence_db, l * 4.0 * 0.8, epsilon = 1e-5);
        assert_relative_eq!(cal.final_gain, (1.0 + l * 0.32) * 0.92, epsilon = 1e-5);
    }

    #[test]
    fn test_shaper_only_above_threshold_in_loud_tier() {
        assert!(!Calibration::from_tone(&tone(520.0, 0.0)).shaper_active);
        assert!(Calibration::from_tone(&tone(550.0, 0.0)).shaper_active);
        assert!(!Calibration::from_tone(&tone(700.0, 0.0)).shaper_active);
    }

    #[test]
    fn test_extreme_tier_caps_punch() {
        let cal = Calibration::from_tone(&tone(800.0, 20.0));
        assert_eq!(cal.tier, LoudnessTier::Extreme);
        assert_eq!(cal.punch_mix, 0.32);
        assert_relative_eq!(cal.punch_peak_db, 3.84, epsilon = 1e-5);
        assert_eq!(cal.trim_db, -8.0);
        assert_relative_eq!(cal.restore_db, 20.0 * 0.30, epsilon = 1e-4);
        assert_relative_eq!(cal.presence_db, 4.0 * 0.8 * 0.75, epsilon = 1e-5);
    }

    #[test]
    fn test_unboosted_bass_trims_with_loudness() {
        let cal = Calibration::from_tone(&tone(800.0, 0.0));
        assert_relative_eq!(cal.trim_db, -1.5);
        assert_eq!(cal.restore_db, 0.0);
    }

    #[test]
    fn test_calibrate_rewires_shaper() {
        let mut guard = AntiDistortion::new(48000);
        guard.calibrate(&tone(560.0, 0.0), 0.0);
        assert!(guard.shaper_inline());
        assert_eq!(guard.compressor().settings().threshold, -9.5);

        guard.calibrate(&tone(300.0, 0.0), 0.5);
        assert!(!guard.shaper_inline());
        assert_eq!(guard.compressor().settings().threshold, -8.5);
    }

    #[test]
    fn test_calibrate_schedules_targets() {
        let mut guard = AntiDistortion::new(48000);
        let cal = guard.calibrate(&tone(400.0, 6.0), 0.0);
        assert_eq!(guard.makeup_gain().final_value(), cal.makeup);
        assert_eq!(guard.final_gain().final_value(), cal.final_gain);
        assert_eq!(guard.presence_gain().final_value(), cal.presence_db);
        assert_eq!(guard.trim_gain().final_value(), cal.trim_db);
        assert_eq!(guard.restore_gain().final_value(), cal.restore_db);
        assert_eq!(guard.punch_gain().final_value(), cal.punch_mix);
        // Smoothed, not stepped
        assert!(guard.makeup_gain().value_at(0.01) < cal.makeup);
    }

    #[test]
    fn test_hot_signal_stays_bounded() {
        let mut guard = AntiDistortion::new(48000);
        guard.calibrate(&tone(560.0, 0.0), 0.0);
        let input = create_sine_buffer(220.0, 3.0, 48000, 0.5);
        let output = render(&mut guard, &input);
        assert!(output.is_finite());
        let tail_peak = output.channel(0)[12000..]
            .iter()
            .fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(tail_peak < 3.0, "Expected peaks under input level, got {}", tail_peak);
    }
}
