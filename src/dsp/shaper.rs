//! Wave shaper node
//!
//! Maps every sample through a transfer curve. The curve spans inputs
//! -1..1; inputs outside that range take the end values. Optional 2x/4x
//! oversampling keeps the generated harmonics from aliasing:
//!
//! ```text
//! Input → Linear Interpolation (upsample) → Curve at N×fs → FIR Lowpass → Decimation → Output
//! ```

use std::f64::consts::PI;
use std::sync::Arc;

use super::AudioNode;
use crate::engine::AudioBuffer;

/// Points in the soft-clip transfer curve
pub const SOFT_CLIP_POINTS: usize = 44100;

/// Anti-aliasing FIR taps
const FILTER_TAPS: usize = 16;

/// Oversampling factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Oversample {
    #[default]
    None,
    X2,
    X4,
}

impl Oversample {
    pub fn factor(&self) -> usize {
        match self {
            Oversample::None => 1,
            Oversample::X2 => 2,
            Oversample::X4 => 4,
        }
    }
}

/// Cubic soft-clip transfer function
///
/// Linear below |x| = 0.5, then `1.5|x| - 0.5|x|³` capped at 0.9.
pub fn soft_clip(x: f32) -> f32 {
    let ax = x.abs();
    if ax < 0.5 {
        x
    } else {
        let compressed = 1.5 * ax - 0.5 * ax * ax * ax;
        x.signum() * compressed.min(0.9)
    }
}

/// Sampled soft-clip curve over -1..1
pub fn soft_clip_curve() -> Vec<f32> {
    (0..SOFT_CLIP_POINTS)
        .map(|i| soft_clip((i as f32 * 2.0) / SOFT_CLIP_POINTS as f32 - 1.0))
        .collect()
}

/// Windowed-sinc lowpass for decimating by `factor`, normalised to unity DC gain
fn design_lowpass(factor: usize) -> [f32; FILTER_TAPS] {
    let cutoff = 0.45 / factor as f64;
    let center = (FILTER_TAPS - 1) as f64 / 2.0;
    let mut taps = [0.0_f64; FILTER_TAPS];
    for (n, tap) in taps.iter_mut().enumerate() {
        let m = n as f64 - center;
        let sinc = if m == 0.0 {
            2.0 * cutoff
        } else {
            (2.0 * PI * cutoff * m).sin() / (PI * m)
        };
        let window = 0.5 - 0.5 * (2.0 * PI * n as f64 / (FILTER_TAPS - 1) as f64).cos();
        *tap = sinc * window;
    }
    let sum: f64 = taps.iter().sum();
    let mut out = [0.0_f32; FILTER_TAPS];
    for (o, t) in out.iter_mut().zip(taps.iter()) {
        *o = (t / sum) as f32;
    }
    out
}

/// Per-channel oversampling state
#[derive(Debug, Clone, Copy)]
struct ChannelState {
    prev_input: f32,
    history: [f32; FILTER_TAPS],
    pos: usize,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            prev_input: 0.0,
            history: [0.0; FILTER_TAPS],
            pos: 0,
        }
    }
}

/// Stereo wave shaper
#[derive(Debug, Clone, Default)]
pub struct WaveShaper {
    curve: Option<Arc<[f32]>>,
    oversample: Oversample,
    coeffs: [f32; FILTER_TAPS],
    states: [ChannelState; 2],
}

impl WaveShaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a transfer curve; `None` passes audio through
    pub fn set_curve(&mut self, curve: Option<Arc<[f32]>>) {
        self.curve = curve.filter(|c| c.len() >= 2);
    }

    pub fn curve(&self) -> Option<&[f32]> {
        self.curve.as_deref()
    }

    pub fn set_oversample(&mut self, oversample: Oversample) {
        if oversample != self.oversample {
            self.oversample = oversample;
            self.coeffs = design_lowpass(oversample.factor());
            self.states = [ChannelState::default(); 2];
        }
    }

    pub fn oversample(&self) -> Oversample {
        self.oversample
    }

    /// Look up one value with linear interpolation between curve points
    fn shape(curve: &[f32], x: f32) -> f32 {
        let n = curve.len();
        let v = (n - 1) as f32 * (x + 1.0) * 0.5;
        if v <= 0.0 {
            return curve[0];
        }
        if v >= (n - 1) as f32 {
            return curve[n - 1];
        }
        let k = v.floor() as usize;
        let frac = v - k as f32;
        curve[k] * (1.0 - frac) + curve[k + 1] * frac
    }
}

impl AudioNode for WaveShaper {
    fn process(&mut self, buffer: &mut AudioBuffer, _start_time: f64) {
        let Some(curve) = self.curve.clone() else {
            return;
        };
        let factor = self.oversample.factor();

        for (ch, state) in self.states.iter_mut().enumerate().take(buffer.channels()) {
            for sample in buffer.channel_mut(ch).iter_mut() {
                let input = *sample;
                if factor == 1 {
                    *sample = Self::shape(&curve, input);
                    continue;
                }

                let mut output = 0.0;
                for i in 0..factor {
                    let t = (i + 1) as f32 / factor as f32;
                    let upsampled = state.prev_input + (input - state.prev_input) * t;
                    let shaped = Self::shape(&curve, upsampled);

                    state.history[state.pos] = shaped;
                    state.pos = (state.pos + 1) % FILTER_TAPS;

                    // Only the last sub-sample survives decimation
                    if i == factor - 1 {
                        output = self
                            .coeffs
                            .iter()
                            .enumerate()
                            .map(|(k, c)| {
                                let idx = (state.pos + FILTER_TAPS - 1 - k) % FILTER_TAPS;
                                c * state.history[idx]
                            })
                            .sum();
                    }
                }
                state.prev_input = input;
                *sample = output;
            }
        }
    }

    fn reset(&mut self) {
        self.states = [ChannelState::default(); 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_util::{create_sine_buffer, render};
    use approx::assert_relative_eq;

    #[test]
    fn test_soft_clip_shape() {
        assert_eq!(soft_clip(0.25), 0.25);
        assert_eq!(soft_clip(-0.4), -0.4);
        // 1.5 * 0.6 - 0.5 * 0.216 = 0.792
        assert_relative_eq!(soft_clip(0.6), 0.792, epsilon = 1e-6);
        assert_eq!(soft_clip(1.0), 0.9);
        assert_eq!(soft_clip(-1.0), -0.9);
    }

    #[test]
    fn test_curve_length_and_bounds() {
        let curve = soft_clip_curve();
        assert_eq!(curve.len(), SOFT_CLIP_POINTS);
        assert!(curve.iter().all(|v| v.abs() <= 0.9));
        assert_eq!(curve[0], -0.9);
    }

    #[test]
    fn test_no_curve_is_passthrough() {
        let mut shaper = WaveShaper::new();
        let input = create_sine_buffer(440.0, 0.8, 48000, 0.01);
        let output = render(&mut shaper, &input);
        assert_eq!(input, output);
    }

    #[test]
    fn test_shaper_limits_peaks() {
        let mut shaper = WaveShaper::new();
        shaper.set_curve(Some(Arc::from(soft_clip_curve())));
        let input = create_sine_buffer(200.0, 1.5, 48000, 0.05);
        let output = render(&mut shaper, &input);
        let peak = output.channel(0).iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(peak <= 0.9 + 1e-4, "peak {}", peak);
    }

    #[test]
    fn test_oversampled_shaper_keeps_level() {
        let mut shaper = WaveShaper::new();
        shaper.set_curve(Some(Arc::from(soft_clip_curve())));
        shaper.set_oversample(Oversample::X4);
        // Quiet input sits in the linear region, so only the FIR shapes it
        let input = create_sine_buffer(200.0, 0.3, 48000, 0.1);
        let output = render(&mut shaper, &input);
        let peak = output.channel(0)[2400..]
            .iter()
            .fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.3).abs() < 0.02, "peak {}", peak);
    }

    #[test]
    fn test_lowpass_has_unity_dc_gain() {
        let taps = design_lowpass(4);
        let sum: f32 = taps.iter().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-5);
    }
}
