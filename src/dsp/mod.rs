//! DSP Library
//!
//! Graph nodes (filters, gains, dynamics, delays, panning) and the
//! components assembled from them: equalizer, tone controls, dynamics
//! guard and the effects router.
//! Every node implements [`AudioNode`] and processes stereo blocks in place.

mod biquad;
mod compressor;
mod controls;
mod delay;
mod dynamics;
pub mod effects;
mod equalizer;
mod gain;
mod panner;
mod shaper;

pub use biquad::{BiquadFilter, FilterType};
pub use compressor::{CompressorSettings, DynamicsCompressor};
pub use controls::{calculate_gain_staging, ControlSettings, GainStaging, ToneControls, ToneStack};
pub use delay::{DelayLine, DelayNode};
pub use dynamics::{AntiDistortion, Calibration, DynamicsGuard, LoudnessTier};
pub use equalizer::{validate_eq_array, Equalizer, GraphicEqualizer, EQ_BANDS, FREQUENCIES};
pub use gain::GainNode;
pub use panner::{Oscillator, StereoPanner};
pub use shaper::{soft_clip, soft_clip_curve, Oversample, WaveShaper};

use crate::engine::AudioBuffer;

/// A processing node in a pipeline graph
pub trait AudioNode: Send {
    /// Process one block in place
    ///
    /// `start_time` is the graph time of the first frame; automated
    /// parameters are evaluated against it.
    fn process(&mut self, buffer: &mut AudioBuffer, start_time: f64);

    /// Clear internal state (filter history, delay lines, envelopes)
    fn reset(&mut self);
}
