//! Gain node
//!
//! Linear gain with sample-accurate automation, so ramps scheduled on the
//! graph clock are applied per sample rather than per block.

use super::AudioNode;
use crate::engine::{AudioBuffer, AudioParam};

/// Largest linear gain a node accepts
pub const MAX_LINEAR_GAIN: f32 = 64.0;

/// A stereo gain stage
#[derive(Debug, Clone)]
pub struct GainNode {
    /// Linear gain
    pub gain: AudioParam,
    sample_rate: u32,
    scratch: Vec<f32>,
}

impl GainNode {
    pub fn new(initial: f32, sample_rate: u32) -> Self {
        Self {
            gain: AudioParam::new("gain", initial, 0.0, MAX_LINEAR_GAIN),
            sample_rate,
            scratch: Vec::new(),
        }
    }

    /// Gain applied at the start of the next block
    pub fn value_at(&self, time: f64) -> f32 {
        self.gain.value_at(time)
    }
}

impl AudioNode for GainNode {
    fn process(&mut self, buffer: &mut AudioBuffer, start_time: f64) {
        if self.gain.is_settled_at(start_time) {
            let gain = self.gain.final_value();
            if gain == 1.0 {
                return;
            }
            for channel in buffer.samples.iter_mut() {
                channel.iter_mut().for_each(|s| *s *= gain);
            }
            return;
        }

        self.scratch.resize(buffer.len(), 0.0);
        self.gain.fill(start_time, self.sample_rate, &mut self.scratch);
        for channel in buffer.samples.iter_mut() {
            for (s, g) in channel.iter_mut().zip(self.scratch.iter()) {
                *s *= g;
            }
        }
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChannelLayout;
    use approx::assert_relative_eq;

    fn create_test_buffer(value: f32, num_samples: usize) -> AudioBuffer {
        let mut buffer = AudioBuffer::new(num_samples, ChannelLayout::Stereo);
        for channel in buffer.samples.iter_mut() {
            channel.iter_mut().for_each(|s| *s = value);
        }
        buffer
    }

    #[test]
    fn test_static_gain() {
        let mut node = GainNode::new(0.5, 48000);
        let mut buffer = create_test_buffer(0.8, 64);
        node.process(&mut buffer, 0.0);
        assert!(buffer.channel(0).iter().all(|&s| (s - 0.4).abs() < 1e-6));
        assert!(buffer.channel(1).iter().all(|&s| (s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn test_ramp_is_sample_accurate() {
        let mut node = GainNode::new(0.0, 48000);
        node.gain.linear_ramp_to_value_at_time(1.0, 100.0 / 48000.0, 0.0);

        let mut buffer = create_test_buffer(1.0, 128);
        node.process(&mut buffer, 0.0);

        assert_relative_eq!(buffer.channel(0)[0], 0.0);
        assert_relative_eq!(buffer.channel(0)[50], 0.5, epsilon = 1e-4);
        assert_relative_eq!(buffer.channel(0)[127], 1.0);
    }

    #[test]
    fn test_negative_gain_is_clamped() {
        let mut node = GainNode::new(1.0, 48000);
        node.gain.set_value(-3.0);
        assert_eq!(node.gain.final_value(), 0.0);
    }
}
