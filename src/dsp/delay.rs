//! Delay lines
//!
//! [`DelayLine`] is a mono circular buffer with fractional reads.
//! [`DelayNode`] wraps one line per channel behind an automatable
//! delay-time parameter.

use super::AudioNode;
use crate::engine::{AudioBuffer, AudioParam};

/// Mono circular delay buffer
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    /// Create a line able to delay up to `max_delay_secs`
    pub fn new(max_delay_secs: f32, sample_rate: u32) -> Self {
        let capacity = (max_delay_secs * sample_rate as f32).ceil() as usize + 2;
        Self {
            buffer: vec![0.0; capacity],
            write_pos: 0,
        }
    }

    /// Largest delay this line supports, in samples
    pub fn max_delay_samples(&self) -> f32 {
        (self.buffer.len() - 2) as f32
    }

    /// Read the sample written `delay_samples` ago (linear interpolation)
    ///
    /// A zero delay returns the most recent write.
    pub fn read(&self, delay_samples: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay_samples.clamp(0.0, self.max_delay_samples());
        let whole = delay.floor() as usize;
        let frac = delay - whole as f32;

        let newest = (self.write_pos + len - 1) % len;
        let a = self.buffer[(newest + len - whole) % len];
        let b = self.buffer[(newest + len - whole - 1) % len];
        a * (1.0 - frac) + b * frac
    }

    /// Push one sample into the line
    pub fn write(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
    }

    pub fn clear(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
    }
}

/// Stereo delay node without feedback
#[derive(Debug, Clone)]
pub struct DelayNode {
    /// Delay time in seconds
    pub delay_time: AudioParam,
    sample_rate: u32,
    lines: [DelayLine; 2],
}

impl DelayNode {
    pub fn new(max_delay_secs: f32, sample_rate: u32) -> Self {
        Self {
            delay_time: AudioParam::new("delayTime", 0.0, 0.0, max_delay_secs),
            sample_rate,
            lines: [
                DelayLine::new(max_delay_secs, sample_rate),
                DelayLine::new(max_delay_secs, sample_rate),
            ],
        }
    }

    /// Delay one channel of a block in place
    pub fn process_channel(&mut self, channel: usize, samples: &mut [f32], start_time: f64) {
        let delay_samples = self.delay_time.value_at(start_time) * self.sample_rate as f32;
        if let Some(line) = self.lines.get_mut(channel) {
            for sample in samples.iter_mut() {
                line.write(*sample);
                *sample = line.read(delay_samples);
            }
        }
    }
}

impl AudioNode for DelayNode {
    fn process(&mut self, buffer: &mut AudioBuffer, start_time: f64) {
        for ch in 0..buffer.channels().min(2) {
            self.process_channel(ch, buffer.channel_mut(ch), start_time);
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

    #[test]
    fn test_delay_line_integer_delay() {
        let mut line = DelayLine::new(0.01, 1000);
        for i in 1..=5 {
            line.write(i as f32);
        }
        assert_eq!(line.read(0.0), 5.0);
        assert_eq!(line.read(2.0), 3.0);
    }

    #[test]
    fn test_delay_line_fractional_delay() {
        let mut line = DelayLine::new(0.01, 1000);
        line.write(0.0);
        line.write(1.0);
        assert_relative_eq!(line.read(0.5), 0.5);
    }

    #[test]
    fn test_delay_node_shifts_impulse() {
        let mut node = DelayNode::new(0.012, 48000);
        node.delay_time.set_value(10.0 / 48000.0);

        let mut buffer = AudioBuffer::new(32, ChannelLayout::Stereo);
        buffer.set_sample(0, 0, 1.0);
        buffer.set_sample(1, 0, 1.0);
        node.process(&mut buffer, 0.0);

        assert_relative_eq!(buffer.channel(0)[10], 1.0, epsilon = 1e-4);
        assert_relative_eq!(buffer.channel(0)[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_delay_clamped_to_capacity() {
        let mut node = DelayNode::new(0.012, 48000);
        node.delay_time.set_value(1.0);
        assert_relative_eq!(node.delay_time.final_value(), 0.012);
    }
}
