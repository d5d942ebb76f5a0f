//! Feedback echo
//!
//! ```text
//! input ─┬─ dry (1.0) ───────────────────┬─ output
//!        └─ delay ─┬─ wet ───────────────┘
//!            ↑     └─ feedback ─┐
//!            └──────────────────┘
//! ```
//! Deactivating mutes the wet path; the delay line keeps running.

use super::{EffectKind, EffectModule, EffectParams};
use crate::dsp::{AudioNode, DelayLine};
use crate::engine::{AudioBuffer, AudioParam};

const MAX_DELAY_SECS: f32 = 5.0;
const MIN_DELAY_SECS: f32 = 0.05;
const MAX_FEEDBACK: f32 = 0.95;
const DEFAULT_DELAY_SECS: f32 = 0.25;
const DEFAULT_FEEDBACK: f32 = 0.3;
const DEFAULT_WET_LEVEL: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct Echo {
    delay_time: AudioParam,
    feedback: AudioParam,
    wet: AudioParam,
    /// Wet gain restored on activation
    wet_level: f32,
    active: bool,
    sample_rate: u32,
    lines: [DelayLine; 2],
    wet_values: Vec<f32>,
}

impl Echo {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            delay_time: AudioParam::new("delayTime", DEFAULT_DELAY_SECS, 0.0, MAX_DELAY_SECS),
            feedback: AudioParam::new("feedback", DEFAULT_FEEDBACK, 0.0, MAX_FEEDBACK),
            wet: AudioParam::new("wet", 0.0, 0.0, 1.0),
            wet_level: DEFAULT_WET_LEVEL,
            active: false,
            sample_rate,
            lines: [
                DelayLine::new(MAX_DELAY_SECS, sample_rate),
                DelayLine::new(MAX_DELAY_SECS, sample_rate),
            ],
            wet_values: Vec::new(),
        }
    }

    pub fn delay_time(&self) -> &AudioParam {
        &self.delay_time
    }

    pub fn feedback(&self) -> &AudioParam {
        &self.feedback
    }

    pub fn wet(&self) -> &AudioParam {
        &self.wet
    }

    pub fn wet_level(&self) -> f32 {
        self.wet_level
    }

    /// Delay in seconds, clamped to 0.05..5
    pub fn set_delay(&mut self, seconds: f32, now: f64) {
        if seconds.is_finite() {
            let seconds = seconds.clamp(MIN_DELAY_SECS, MAX_DELAY_SECS);
            self.delay_time.set_value_at_time(seconds, now);
        }
    }

    /// Feedback ratio, clamped to 0..0.95
    pub fn set_feedback(&mut self, ratio: f32, now: f64) {
        if ratio.is_finite() {
            self.feedback.set_value_at_time(ratio.clamp(0.0, MAX_FEEDBACK), now);
        }
    }

    /// Wet level, clamped to 0..1; heard only while active
    pub fn set_wet(&mut self, level: f32, now: f64) {
        if level.is_finite() {
            self.wet_level = level.clamp(0.0, 1.0);
            if self.active {
                self.wet.set_value_at_time(self.wet_level, now);
            }
        }
    }
}

impl EffectModule for Echo {
    fn kind(&self) -> EffectKind {
        EffectKind::Echo
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool, now: f64) {
        self.active = active;
        let target = if active { self.wet_level } else { 0.0 };
        self.wet.set_value_at_time(target, now);
    }

    fn update_params(&mut self, params: &EffectParams, now: f64) {
        if let Some(delay) = params.delay {
            self.set_delay(delay, now);
        }
        if let Some(feedback) = params.feedback {
            self.set_feedback(feedback, now);
        }
        if let Some(wet) = params.wet {
            self.set_wet(wet, now);
        }
    }
}

impl AudioNode for Echo {
    fn process(&mut self, buffer: &mut AudioBuffer, start_time: f64) {
        let delay_samples = self.delay_time.value_at(start_time) * self.sample_rate as f32;
        // The newest sample in the line is one frame old when read
        let read_at = (delay_samples - 1.0).max(0.0);
        let feedback = self.feedback.value_at(start_time);

        self.wet_values.resize(buffer.len(), 0.0);
        self.wet.fill(start_time, self.sample_rate, &mut self.wet_values);

        for (ch, line) in self.lines.iter_mut().enumerate().take(buffer.channels()) {
            for (sample, wet) in buffer.channel_mut(ch).iter_mut().zip(&self.wet_values) {
                let delayed = line.read(read_at);
                line.write(*sample + delayed * feedback);
                *sample += delayed * wet;
            }
        }
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChannelLayout;
    use approx::assert_relative_eq;

    fn impulse(len: usize) -> AudioBuffer {
        let mut buffer = AudioBuffer::with_sample_rate(len, ChannelLayout::Stereo, 1000);
        buffer.set_sample(0, 0, 1.0);
        buffer.set_sample(1, 0, 1.0);
        buffer
    }

    #[test]
    fn test_defaults() {
        let fx = Echo::new(48000);
        assert_eq!(fx.delay_time().final_value(), 0.25);
        assert_eq!(fx.feedback().final_value(), 0.3);
        assert_eq!(fx.wet().final_value(), 0.0);
        assert_eq!(fx.wet_level(), 0.5);
    }

    #[test]
    fn test_activation_toggles_wet() {
        let mut fx = Echo::new(48000);
        fx.set_active(true, 0.0);
        assert_eq!(fx.wet().final_value(), 0.5);
        fx.set_wet(0.8, 0.1);
        assert_eq!(fx.wet().final_value(), 0.8);
        fx.set_active(false, 0.2);
        assert_eq!(fx.wet().final_value(), 0.0);
        // Wet level survives deactivation
        fx.set_active(true, 0.3);
        assert_eq!(fx.wet().final_value(), 0.8);
    }

    #[test]
    fn test_wet_level_inaudible_while_inactive() {
        let mut fx = Echo::new(48000);
        fx.set_wet(0.7, 0.0);
        assert_eq!(fx.wet().final_value(), 0.0);
        assert_eq!(fx.wet_level(), 0.7);
    }

    #[test]
    fn test_params_are_clamped() {
        let mut fx = Echo::new(48000);
        fx.update_params(
            &EffectParams {
                delay: Some(0.01),
                feedback: Some(2.0),
                wet: Some(-1.0),
                ..Default::default()
            },
            0.0,
        );
        assert_eq!(fx.delay_time().final_value(), 0.05);
        assert_eq!(fx.feedback().final_value(), 0.95);
        assert_eq!(fx.wet_level(), 0.0);

        fx.set_delay(9.0, 0.0);
        assert_eq!(fx.delay_time().final_value(), 5.0);
    }

    #[test]
    fn test_repeats_decay_by_feedback() {
        let mut fx = Echo::new(1000);
        fx.set_delay(0.1, 0.0);
        fx.set_feedback(0.5, 0.0);
        fx.set_active(true, 0.0);

        let mut buffer = impulse(400);
        fx.process(&mut buffer, 0.0);

        let out = buffer.channel(0);
        assert_relative_eq!(out[0], 1.0);
        assert_relative_eq!(out[100], 0.5, epsilon = 1e-5);
        assert_relative_eq!(out[200], 0.25, epsilon = 1e-5);
        assert_relative_eq!(out[300], 0.125, epsilon = 1e-5);
    }
}
