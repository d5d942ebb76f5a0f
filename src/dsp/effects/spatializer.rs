//! Rotational spatializer ("8D audio")
//!
//! A sine LFO sweeps the stereo pan position around the listener. The LFO's
//! influence is ramped in over 20 ms on activation so the first sweep does
//! not click.

use super::{EffectKind, EffectModule, EffectParams};
use crate::dsp::{AudioNode, Oscillator, StereoPanner};
use crate::engine::{AudioBuffer, AudioParam};

/// Rotation period used until a speed is set, in seconds
const DEFAULT_SPEED_SECS: f32 = 3.0;
/// Shortest accepted rotation period, in seconds
const MIN_SPEED_SECS: f32 = 0.25;
const FREQUENCY_TIME_CONSTANT: f64 = 0.05;
const DEPTH_RAMP_SECS: f64 = 0.02;

#[derive(Debug, Clone)]
pub struct Spatializer {
    panner: StereoPanner,
    lfo: Oscillator,
    /// Scales the LFO before it is added to the pan position
    lfo_depth: AudioParam,
    speed_secs: f32,
    active: bool,
    sample_rate: u32,
    pan_values: Vec<f32>,
    depth_values: Vec<f32>,
    lfo_values: Vec<f32>,
}

impl Spatializer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            panner: StereoPanner::new(sample_rate),
            lfo: Oscillator::new(1.0 / DEFAULT_SPEED_SECS, sample_rate),
            lfo_depth: AudioParam::new("lfoDepth", 0.0, 0.0, 1.0),
            speed_secs: DEFAULT_SPEED_SECS,
            active: false,
            sample_rate,
            pan_values: Vec::new(),
            depth_values: Vec::new(),
            lfo_values: Vec::new(),
        }
    }

    /// Rotation period in seconds
    pub fn speed(&self) -> f32 {
        self.speed_secs
    }

    pub fn lfo_frequency(&self) -> f32 {
        1.0 / self.speed_secs.max(MIN_SPEED_SECS)
    }

    pub fn lfo_depth(&self) -> &AudioParam {
        &self.lfo_depth
    }

    pub fn pan(&self) -> &AudioParam {
        &self.panner.pan
    }

    pub fn is_rotating(&self) -> bool {
        self.lfo.is_running()
    }

    /// Set the rotation period; periods of 0.25 s or less keep the previous one
    pub fn set_speed(&mut self, seconds: f32, now: f64) {
        if seconds.is_finite() && seconds > MIN_SPEED_SECS {
            self.speed_secs = seconds;
        }
        if self.lfo.is_running() {
            let frequency = self.lfo_frequency();
            self.lfo
                .frequency
                .set_target_at_time(frequency, now, FREQUENCY_TIME_CONSTANT);
        }
    }

    fn center(&mut self, now: f64) {
        self.panner.pan.cancel_scheduled_values(now);
        self.panner.pan.set_value_at_time(0.0, now);
    }
}

impl EffectModule for Spatializer {
    fn kind(&self) -> EffectKind {
        EffectKind::Spatializer
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool, now: f64) {
        if active == self.active {
            return;
        }
        self.active = active;
        self.lfo_depth.cancel_scheduled_values(now);

        if active {
            if !self.lfo.is_running() {
                let frequency = self.lfo_frequency();
                self.lfo.frequency.set_value(frequency);
                self.lfo.start();
            }
            self.center(now);
            self.lfo_depth.set_value_at_time(0.0, now);
            self.lfo_depth
                .linear_ramp_to_value_at_time(1.0, now + DEPTH_RAMP_SECS, now);
        } else {
            self.lfo_depth.set_value_at_time(0.0, now);
            self.lfo.stop();
            self.center(now);
        }
    }

    fn update_params(&mut self, params: &EffectParams, now: f64) {
        if let Some(speed) = params.speed {
            self.set_speed(speed, now);
        }
    }
}

impl AudioNode for Spatializer {
    fn process(&mut self, buffer: &mut AudioBuffer, start_time: f64) {
        let n = buffer.len();
        self.pan_values.resize(n, 0.0);
        self.depth_values.resize(n, 0.0);
        self.lfo_values.resize(n, 0.0);

        self.panner.pan.fill(start_time, self.sample_rate, &mut self.pan_values);
        self.lfo_depth
            .fill(start_time, self.sample_rate, &mut self.depth_values);
        self.lfo.render(start_time, &mut self.lfo_values);

        for ((pan, depth), lfo) in self
            .pan_values
            .iter_mut()
            .zip(&self.depth_values)
            .zip(&self.lfo_values)
        {
            *pan += depth * lfo;
        }
        self.panner.process_with(buffer, &self.pan_values);
    }

    fn reset(&mut self) {}
}
