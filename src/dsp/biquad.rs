//! Biquad filter node
//!
//! Second-order IIR filter with automatable frequency, Q and gain.
//! Coefficients follow the Audio EQ Cookbook and are recomputed at most
//! once per processed block from the parameter values at the block start.

use std::f64::consts::{FRAC_1_SQRT_2, PI};

use serde::{Deserialize, Serialize};

use super::AudioNode;
use crate::engine::{AudioBuffer, AudioParam};

/// Filter response shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    /// Bell curve boost/cut
    Peaking,
    /// Boost/cut below frequency
    LowShelf,
    /// Boost/cut above frequency
    HighShelf,
    /// Remove above frequency
    LowPass,
    /// Remove below frequency
    HighPass,
}

/// Biquad filter coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (a0 + a1*z^-1 + a2*z^-2)
/// Normalized: all coefficients divided by a0
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

impl BiquadCoeffs {
    /// Calculate biquad coefficients using Audio EQ Cookbook formulas
    /// Reference: https://www.w3.org/2011/audio/audio-eq-cookbook.html
    ///
    /// Shelves use a fixed slope of 1 and ignore `q`.
    pub(crate) fn calculate(
        filter_type: FilterType,
        sample_rate: f64,
        frequency: f64,
        gain_db: f64,
        q: f64,
    ) -> Self {
        // Clamp frequency to valid range (below Nyquist)
        let freq = frequency.clamp(10.0, sample_rate / 2.0 - 1.0);
        let q = match filter_type {
            FilterType::LowShelf | FilterType::HighShelf => FRAC_1_SQRT_2,
            _ => q.clamp(0.1, 30.0),
        };

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);
        let a = 10.0_f64.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            FilterType::LowShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            FilterType::HighShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            FilterType::LowPass => (
                (1.0 - cos_w0) / 2.0,
                1.0 - cos_w0,
                (1.0 - cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterType::HighPass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
        };

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Biquad filter state for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    /// Direct Form I
    #[inline]
    fn process(&mut self, input: f64, coeffs: &BiquadCoeffs) -> f64 {
        let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A stereo biquad filter node
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    filter_type: FilterType,
    /// Corner/center frequency in Hz
    pub frequency: AudioParam,
    /// Quality factor (peaking and pass filters)
    pub q: AudioParam,
    /// Gain in dB (peaking and shelf filters)
    pub gain: AudioParam,
    sample_rate: u32,
    coeffs: BiquadCoeffs,
    coeff_key: Option<(f32, f32, f32)>,
    states: [BiquadState; 2],
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType, frequency: f32, q: f32, sample_rate: u32) -> Self {
        let nyquist = sample_rate as f32 / 2.0;
        Self {
            filter_type,
            frequency: AudioParam::new("frequency", frequency, 10.0, nyquist),
            q: AudioParam::new("q", q, 0.1, 30.0),
            gain: AudioParam::new("gain", 0.0, -40.0, 40.0),
            sample_rate,
            coeffs: BiquadCoeffs::default(),
            coeff_key: None,
            states: [BiquadState::default(); 2],
        }
    }

    pub fn peaking(frequency: f32, q: f32, sample_rate: u32) -> Self {
        Self::new(FilterType::Peaking, frequency, q, sample_rate)
    }

    pub fn low_shelf(frequency: f32, sample_rate: u32) -> Self {
        Self::new(FilterType::LowShelf, frequency, FRAC_1_SQRT_2 as f32, sample_rate)
    }

    pub fn high_shelf(frequency: f32, sample_rate: u32) -> Self {
        Self::new(FilterType::HighShelf, frequency, FRAC_1_SQRT_2 as f32, sample_rate)
    }

    pub fn high_pass(frequency: f32, sample_rate: u32) -> Self {
        Self::new(FilterType::HighPass, frequency, FRAC_1_SQRT_2 as f32, sample_rate)
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    fn update_coefficients(&mut self, time: f64) {
        let key = (
            self.frequency.value_at(time),
            self.q.value_at(time),
            self.gain.value_at(time),
        );
        if self.coeff_key == Some(key) {
            return;
        }
        self.coeffs = BiquadCoeffs::calculate(
            self.filter_type,
            self.sample_rate as f64,
            key.0 as f64,
            key.2 as f64,
            key.1 as f64,
        );
        self.coeff_key = Some(key);
    }
}

impl AudioNode for BiquadFilter {
    fn process(&mut self, buffer: &mut AudioBuffer, start_time: f64) {
        self.update_coefficients(start_time);
        let coeffs = self.coeffs;
        for (ch, state) in self.states.iter_mut().enumerate().take(buffer.channels()) {
            for sample in buffer.channel_mut(ch).iter_mut() {
                *sample = state.process(*sample as f64, &coeffs) as f32;
            }
        }
    }

    fn reset(&mut self) {
        for state in &mut self.states {
            state.reset();
        }
    }
}
