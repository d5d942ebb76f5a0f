//! Stereo panner and low-frequency oscillator
//!
//! The panner uses the equal-power law. For a stereo input, panning left
//! folds part of the right channel into the left and vice versa, so no
//! signal is lost at the extremes.

use std::f32::consts::{FRAC_PI_2, PI};

use super::AudioNode;
use crate::engine::{AudioBuffer, AudioParam};

/// Equal-power stereo panner
#[derive(Debug, Clone)]
pub struct StereoPanner {
    /// Pan position, -1 (left) to 1 (right)
    pub pan: AudioParam,
    sample_rate: u32,
    scratch: Vec<f32>,
}

impl StereoPanner {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            pan: AudioParam::new("pan", 0.0, -1.0, 1.0),
            sample_rate,
            scratch: Vec::new(),
        }
    }

    /// Pan one stereo frame
    #[inline]
    pub fn pan_frame(left: f32, right: f32, pan: f32) -> (f32, f32) {
        let pan = pan.clamp(-1.0, 1.0);
        if pan <= 0.0 {
            let x = (pan + 1.0) * FRAC_PI_2;
            (left + right * x.cos(), right * x.sin())
        } else {
            let x = pan * FRAC_PI_2;
            (left * x.cos(), right + left * x.sin())
        }
    }

    /// Pan a block using per-sample positions from `pan_values`
    pub fn process_with(&self, buffer: &mut AudioBuffer, pan_values: &[f32]) {
        if buffer.channels() < 2 {
            return;
        }
        let (left, rest) = buffer.samples.split_at_mut(1);
        for ((l, r), &pan) in left[0]
            .iter_mut()
            .zip(rest[0].iter_mut())
            .zip(pan_values.iter())
        {
            let (nl, nr) = Self::pan_frame(*l, *r, pan);
            *l = nl;
            *r = nr;
        }
    }
}

impl AudioNode for StereoPanner {
    fn process(&mut self, buffer: &mut AudioBuffer, start_time: f64) {
        let mut values = std::mem::take(&mut self.scratch);
        values.resize(buffer.len(), 0.0);
        self.pan.fill(start_time, self.sample_rate, &mut values);
        self.process_with(buffer, &values);
        self.scratch = values;
    }

    fn reset(&mut self) {}
}

/// Sine low-frequency oscillator
#[derive(Debug, Clone)]
pub struct Oscillator {
    /// Frequency in Hz
    pub frequency: AudioParam,
    sample_rate: u32,
    phase: f32,
    running: bool,
}

impl Oscillator {
    pub fn new(frequency: f32, sample_rate: u32) -> Self {
        Self {
            frequency: AudioParam::new("frequency", frequency, 0.0, sample_rate as f32 / 2.0),
            sample_rate,
            phase: 0.0,
            running: false,
        }
    }

    /// Start from phase zero; a running oscillator keeps its phase
    pub fn start(&mut self) {
        if !self.running {
            self.phase = 0.0;
            self.running = true;
        }
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Render `out.len()` samples; a stopped oscillator outputs silence
    pub fn render(&mut self, start_time: f64, out: &mut [f32]) {
        if !self.running {
            out.iter_mut().for_each(|v| *v = 0.0);
            return;
        }
        let frequency = self.frequency.value_at(start_time);
        let increment = 2.0 * PI * frequency / self.sample_rate as f32;
        for v in out.iter_mut() {
            *v = self.phase.sin();
            self.phase += increment;
            if self.phase >= 2.0 * PI {
                self.phase -= 2.0 * PI;
            }
        }
    }
}
