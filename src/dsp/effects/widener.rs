//! Stereo widener
//!
//! Delays the left channel by up to 12 ms (scaled by depth) and leaves the
//! right channel untouched. The offset only applies while active.

use super::{EffectKind, EffectModule, EffectParams};
use crate::dsp::{AudioNode, DelayNode};
use crate::engine::AudioBuffer;

/// Left-channel offset at 100% depth, in seconds
const MAX_OFFSET_SECS: f32 = 0.012;

#[derive(Debug, Clone)]
pub struct Widener {
    left: DelayNode,
    right: DelayNode,
    depth: f32,
    active: bool,
}

impl Widener {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            left: DelayNode::new(MAX_OFFSET_SECS, sample_rate),
            right: DelayNode::new(MAX_OFFSET_SECS, sample_rate),
            depth: 0.0,
            active: false,
        }
    }

    /// Depth in percent
    pub fn depth(&self) -> f32 {
        self.depth
    }

    /// Scheduled (left, right) offsets in seconds
    pub fn offsets(&self) -> (f32, f32) {
        (
            self.left.delay_time.final_value(),
            self.right.delay_time.final_value(),
        )
    }

    /// Set depth (clamped to 0..100; non-finite counts as 0)
    pub fn set_depth(&mut self, depth: f32, now: f64) {
        self.depth = if depth.is_finite() {
            depth.clamp(0.0, 100.0)
        } else {
            0.0
        };
        if self.active {
            self.apply_offsets(now);
        }
    }

    fn apply_offsets(&mut self, now: f64) {
        let offset = if self.active {
            self.depth / 100.0 * MAX_OFFSET_SECS
        } else {
            0.0
        };
        self.left.delay_time.set_value_at_time(offset, now);
        self.right.delay_time.set_value_at_time(0.0, now);
    }
}

impl EffectModule for Widener {
    fn kind(&self) -> EffectKind {
        EffectKind::Widener
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool, now: f64) {
        self.active = active;
        self.apply_offsets(now);
    }

    fn update_params(&mut self, params: &EffectParams, now: f64) {
        if let Some(depth) = params.depth {
            self.set_depth(depth, now);
        }
    }
}

impl AudioNode for Widener {
    fn process(&mut self, buffer: &mut AudioBuffer, start_time: f64) {
        if buffer.channels() < 2 {
            return;
        }
        self.left.process_channel(0, buffer.channel_mut(0), start_time);
        self.right.process_channel(1, buffer.channel_mut(1), start_time);
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChannelLayout;
    use approx::assert_relative_eq;

    #[test]
    fn test_depth_only_applies_while_active() {
        let mut fx = Widener::new(48000);
        fx.set_depth(50.0, 0.0);
        assert_eq!(fx.offsets(), (0.0, 0.0));

        fx.set_active(true, 0.0);
        assert_relative_eq!(fx.offsets().0, 0.006, epsilon = 1e-6);
        assert_eq!(fx.offsets().1, 0.0);

        fx.set_active(false, 0.1);
        assert_eq!(fx.offsets(), (0.0, 0.0));
    }

    #[test]
    fn test_depth_clamped() {
        let mut fx = Widener::new(48000);
        fx.set_active(true, 0.0);
        fx.set_depth(250.0, 0.0);
        assert_eq!(fx.depth(), 100.0);
        assert_relative_eq!(fx.offsets().0, 0.012, epsilon = 1e-6);
        fx.set_depth(f32::NAN, 0.0);
        assert_eq!(fx.depth(), 0.0);
    }

    #[test]
    fn test_left_channel_is_delayed() {
        let mut fx = Widener::new(48000);
        fx.set_active(true, 0.0);
        fx.set_depth(100.0, 0.0);

        let mut buffer = AudioBuffer::new(1024, ChannelLayout::Stereo);
        buffer.set_sample(0, 0, 1.0);
        buffer.set_sample(1, 0, 1.0);
        fx.process(&mut buffer, 0.0);

        // 12 ms at 48 kHz is 576 samples
        assert_relative_eq!(buffer.channel(0)[576], 1.0, epsilon = 1e-3);
        assert_relative_eq!(buffer.channel(1)[0], 1.0);
    }
}
