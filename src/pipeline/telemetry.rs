//! RMS telemetry tap
//!
//! Keeps the most recent window of the master output (mono down-mix) and
//! reports its root-mean-square level, like an analyser's time-domain view.

use crate::engine::buffer::rms;
use crate::engine::AudioBuffer;

/// Analysis window used when none is configured
pub const DEFAULT_METER_WINDOW: usize = 2048;

#[derive(Debug, Clone)]
pub struct RmsMeter {
    window: Vec<f32>,
    pos: usize,
}

impl RmsMeter {
    pub fn new(window: usize) -> Self {
        Self {
            window: vec![0.0; window.max(1)],
            pos: 0,
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Append a rendered block
    pub fn push(&mut self, block: &AudioBuffer) {
        for sample in block.mono_downmix() {
            self.window[self.pos] = sample;
            self.pos = (self.pos + 1) % self.window.len();
        }
    }

    /// RMS over the whole window
    pub fn rms(&self) -> f32 {
        rms(&self.window)
    }

    pub fn clear(&mut self) {
        self.window.iter_mut().for_each(|s| *s = 0.0);
        self.pos = 0;
    }
}

impl Default for RmsMeter {
    fn default() -> Self {
        Self::new(DEFAULT_METER_WINDOW)
    }
}
