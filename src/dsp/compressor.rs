//! Dynamics compressor node
//!
//! Feed-forward compressor with a linked stereo peak detector, soft knee
//! gain computer, and one-pole attack/release smoothing of the gain
//! reduction. The same node serves as compressor and, with a high ratio
//! and fast attack, as limiter.

use serde::{Deserialize, Serialize};

use super::AudioNode;
use crate::engine::buffer::{db_to_linear, linear_to_db};
use crate::engine::{AudioBuffer, AudioParam};

/// Floor for level detection in dB
const DETECTOR_FLOOR_DB: f32 = -96.0;

/// A full set of compressor settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressorSettings {
    /// Threshold in dBFS
    pub threshold: f32,
    /// Knee width in dB
    pub knee: f32,
    /// Compression ratio (n:1)
    pub ratio: f32,
    /// Attack time in seconds
    pub attack: f32,
    /// Release time in seconds
    pub release: f32,
}

impl CompressorSettings {
    pub const fn new(threshold: f32, knee: f32, ratio: f32, attack: f32, release: f32) -> Self {
        Self {
            threshold,
            knee,
            ratio,
            attack,
            release,
        }
    }
}

/// Compressor node
#[derive(Debug, Clone)]
pub struct DynamicsCompressor {
    pub threshold: AudioParam,
    pub knee: AudioParam,
    pub ratio: AudioParam,
    pub attack: AudioParam,
    pub release: AudioParam,
    sample_rate: u32,
    /// Smoothed gain reduction (linear, 1.0 = none)
    envelope: f32,
}

impl DynamicsCompressor {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            threshold: AudioParam::new("threshold", -24.0, -100.0, 0.0),
            knee: AudioParam::new("knee", 30.0, 0.0, 40.0),
            ratio: AudioParam::new("ratio", 12.0, 1.0, 20.0),
            attack: AudioParam::new("attack", 0.003, 0.0, 1.0),
            release: AudioParam::new("release", 0.25, 0.0, 1.0),
            sample_rate,
            envelope: 1.0,
        }
    }

    /// Overwrite every parameter immediately
    pub fn apply(&mut self, settings: &CompressorSettings) {
        self.threshold.set_value(settings.threshold);
        self.knee.set_value(settings.knee);
        self.ratio.set_value(settings.ratio);
        self.attack.set_value(settings.attack);
        self.release.set_value(settings.release);
    }

    /// Settings currently in force
    pub fn settings(&self) -> CompressorSettings {
        CompressorSettings {
            threshold: self.threshold.final_value(),
            knee: self.knee.final_value(),
            ratio: self.ratio.final_value(),
            attack: self.attack.final_value(),
            release: self.release.final_value(),
        }
    }

    /// Current gain reduction in dB (zero or negative), for metering
    pub fn reduction_db(&self) -> f32 {
        linear_to_db(self.envelope).max(DETECTOR_FLOOR_DB)
    }

    /// Compute gain reduction for a given input level in dB
    /// Returns the gain reduction in dB (negative value)
    fn compute_gain_reduction_db(input_db: f32, threshold: f32, knee: f32, ratio: f32) -> f32 {
        if knee > 0.0 {
            let knee_start = threshold - knee / 2.0;
            let knee_end = threshold + knee / 2.0;

            if input_db <= knee_start {
                0.0
            } else if input_db >= knee_end {
                (threshold + (input_db - threshold) / ratio) - input_db
            } else {
                // Quadratic knee, continuous with both straight segments
                let over = input_db - knee_start;
                (1.0 / ratio - 1.0) * over * over / (2.0 * knee)
            }
        } else if input_db <= threshold {
            0.0
        } else {
            (threshold + (input_db - threshold) / ratio) - input_db
        }
    }

    /// One-pole coefficient: exp(-1 / time_in_samples)
    fn time_coefficient(seconds: f32, sample_rate: u32) -> f32 {
        let samples = seconds * sample_rate as f32;
        if samples > 0.0 {
            (-1.0 / samples).exp()
        } else {
            0.0
        }
    }
}

impl AudioNode for DynamicsCompressor {
    fn process(&mut self, buffer: &mut AudioBuffer, start_time: f64) {
        let threshold = self.threshold.value_at(start_time);
        let knee = self.knee.value_at(start_time);
        let ratio = self.ratio.value_at(start_time);
        let attack_coeff = Self::time_coefficient(self.attack.value_at(start_time), self.sample_rate);
        let release_coeff =
            Self::time_coefficient(self.release.value_at(start_time), self.sample_rate);

        let num_channels = buffer.channels();
        for frame in 0..buffer.len() {
            // Linked detection: loudest channel drives both
            let mut peak: f32 = 0.0;
            for ch in 0..num_channels {
                peak = peak.max(buffer.samples[ch][frame].abs());
            }
            let input_db = linear_to_db(peak).max(DETECTOR_FLOOR_DB);
            let target_db = Self::compute_gain_reduction_db(input_db, threshold, knee, ratio);
            let target = db_to_linear(target_db);

            let coeff = if target < self.envelope {
                attack_coeff
            } else {
                release_coeff
            };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * target;

            for ch in 0..num_channels {
                buffer.samples[ch][frame] *= self.envelope;
            }
        }
    }

    fn reset(&mut self) {
        self.envelope = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_util::{create_sine_buffer, render, steady_rms};
    use approx::assert_relative_eq;

    #[test]
    fn test_gain_computer_hard_knee() {
        // 10 dB over threshold at 4:1 leaves 2.5 dB over: 7.5 dB reduction
        let gr = DynamicsCompressor::compute_gain_reduction_db(-10.0, -20.0, 0.0, 4.0);
        assert_relative_eq!(gr, -7.5, epsilon = 1e-5);
        assert_eq!(DynamicsCompressor::compute_gain_reduction_db(-30.0, -20.0, 0.0, 4.0), 0.0);
    }

    #[test]
    fn test_gain_computer_soft_knee_is_continuous() {
        let below = DynamicsCompressor::compute_gain_reduction_db(-25.001, -20.0, 10.0, 4.0);
        let at_start = DynamicsCompressor::compute_gain_reduction_db(-24.999, -20.0, 10.0, 4.0);
        assert!((below - at_start).abs() < 1e-3);

        let inside = DynamicsCompressor::compute_gain_reduction_db(-15.001, -20.0, 10.0, 4.0);
        let above = DynamicsCompressor::compute_gain_reduction_db(-14.999, -20.0, 10.0, 4.0);
        assert!((inside - above).abs() < 1e-2);
    }

    #[test]
    fn test_quiet_signal_passes() {
        let mut comp = DynamicsCompressor::new(48000);
        comp.apply(&CompressorSettings::new(-6.0, 10.0, 6.0, 0.003, 0.12));
        let input = create_sine_buffer(440.0, 0.05, 48000, 0.2);
        let output = render(&mut comp, &input);
        let ratio = steady_rms(&output) / steady_rms(&input);
        assert!((ratio - 1.0).abs() < 0.01, "Expected unity, got {}", ratio);
    }

    #[test]
    fn test_loud_signal_is_reduced() {
        let mut comp = DynamicsCompressor::new(48000);
        comp.apply(&CompressorSettings::new(-0.9, 1.0, 11.0, 0.001, 0.06));
        let input = create_sine_buffer(440.0, 2.0, 48000, 0.3);
        let output = render(&mut comp, &input);
        assert!(steady_rms(&output) < steady_rms(&input) * 0.7);
        assert!(comp.reduction_db() < -3.0);
    }

    #[test]
    fn test_settings_round_trip() {
        let mut comp = DynamicsCompressor::new(48000);
        let settings = CompressorSettings::new(-10.5, 7.0, 8.8, 0.0035, 0.22);
        comp.apply(&settings);
        assert_eq!(comp.settings(), settings);
    }
}
