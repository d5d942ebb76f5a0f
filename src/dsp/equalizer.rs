//! Ten-band graphic equalizer
//!
//! Fixed center frequencies from 32 Hz to 16 kHz. The lowest band is a
//! low shelf, the highest a high shelf, the rest are peaking filters.
//! Bands run in series in ascending frequency order.

use serde_json::Value;

use super::{AudioNode, BiquadFilter};
use crate::engine::AudioBuffer;
use crate::error::{AurisError, Result};

/// Number of equalizer bands
pub const EQ_BANDS: usize = 10;

/// Band center frequencies in Hz
pub const FREQUENCIES: [f32; EQ_BANDS] = [
    32.0, 64.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

/// Bandwidth of the peaking bands
const PEAKING_Q: f32 = 1.1;

/// Largest boost or cut a band accepts, in dB
const MAX_BAND_GAIN_DB: f32 = 24.0;

/// Smoothing time constant for band changes, in seconds
const BAND_TIME_CONSTANT: f64 = 0.03;

/// Per-band gain control
pub trait Equalizer: Send {
    /// Glide band `index` towards `gain_db`
    fn set_band(&mut self, index: usize, gain_db: f32, now: f64) -> Result<()>;

    /// Apply one gain per band; no band changes unless every gain is finite
    fn set_all(&mut self, gains: &[f32; EQ_BANDS], now: f64) -> Result<()> {
        if let Some(index) = gains.iter().position(|g| !g.is_finite()) {
            return Err(non_finite_band(index, gains[index]));
        }
        for (index, gain_db) in gains.iter().enumerate() {
            self.set_band(index, *gain_db, now)?;
        }
        Ok(())
    }

    /// Settled gain every band is heading towards
    fn band_targets(&self) -> [f32; EQ_BANDS];
}

/// Check that `value` is an array of exactly ten finite numbers
///
/// # Returns
/// The gains as `f32`, or `InvalidPayload` describing the mismatch
pub fn validate_eq_array(value: &Value) -> Result<[f32; EQ_BANDS]> {
    let items = value
        .as_array()
        .ok_or_else(|| AurisError::invalid_payload("EQ gains must be an array"))?;
    if items.len() != EQ_BANDS {
        return Err(AurisError::invalid_payload(format!(
            "EQ array needs {} values, got {}",
            EQ_BANDS,
            items.len()
        )));
    }

    let mut gains = [0.0_f32; EQ_BANDS];
    for (slot, item) in gains.iter_mut().zip(items) {
        // Finite as f64 is not enough: 1e39 overflows to inf as f32
        match item.as_f64().map(|v| v as f32) {
            Some(v) if v.is_finite() => *slot = v,
            _ => {
                return Err(AurisError::invalid_payload(format!(
                    "EQ gain is not a finite number: {}",
                    item
                )))
            }
        }
    }
    Ok(gains)
}

fn non_finite_band(index: usize, gain_db: f32) -> AurisError {
    AurisError::InvalidParameter {
        param: format!("eq[{}]", index),
        value: gain_db.to_string(),
        expected: "finite dB value".to_string(),
    }
}

/// The ten-band filter bank
#[derive(Debug, Clone)]
pub struct GraphicEqualizer {
    bands: Vec<BiquadFilter>,
}

impl GraphicEqualizer {
    pub fn new(sample_rate: u32) -> Self {
        let bands = FREQUENCIES
            .iter()
            .enumerate()
            .map(|(i, &freq)| match i {
                0 => BiquadFilter::low_shelf(freq, sample_rate),
                i if i == EQ_BANDS - 1 => BiquadFilter::high_shelf(freq, sample_rate),
                _ => BiquadFilter::peaking(freq, PEAKING_Q, sample_rate),
            })
            .collect();
        Self { bands }
    }

    /// Band filter at `index`
    pub fn band(&self, index: usize) -> Option<&BiquadFilter> {
        self.bands.get(index)
    }
}

impl Equalizer for GraphicEqualizer {
    fn set_band(&mut self, index: usize, gain_db: f32, now: f64) -> Result<()> {
        if !gain_db.is_finite() {
            return Err(non_finite_band(index, gain_db));
        }
        let band = self
            .bands
            .get_mut(index)
            .ok_or_else(|| AurisError::InvalidParameter {
                param: "index".to_string(),
                value: index.to_string(),
                expected: format!("0-{}", EQ_BANDS - 1),
            })?;

        let gain_db = gain_db.clamp(-MAX_BAND_GAIN_DB, MAX_BAND_GAIN_DB);
        band.gain.set_target_at_time(gain_db, now, BAND_TIME_CONSTANT);
        Ok(())
    }

    fn band_targets(&self) -> [f32; EQ_BANDS] {
        let mut targets = [0.0; EQ_BANDS];
        for (t, band) in targets.iter_mut().zip(&self.bands) {
            *t = band.gain.final_value();
        }
        targets
    }
}

impl AudioNode for GraphicEqualizer {
    fn process(&mut self, buffer: &mut AudioBuffer, start_time: f64) {
        for band in &mut self.bands {
            band.process(buffer, start_time);
        }
    }

    fn reset(&mut self) {
        for band in &mut self.bands {
            band.reset();
        }
    }
}
