//! Audio Buffer Management
//!
//! Provides the block type every graph node processes in place.
//! Audio is held non-interleaved as 32-bit floats; the graph always runs
//! stereo, mono sources are up-mixed on entry.

use crate::error::{AurisError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default processing sample rate (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default render quantum in frames
pub const RENDER_QUANTUM: usize = 128;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
///
/// # Arguments
/// * `db` - Value in decibels
///
/// # Returns
/// Linear amplitude (0.0 to 1.0+ range)
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// # Returns
/// Value in decibels. Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Root-mean-square of a slice of samples
///
/// Returns 0.0 for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

// ============================================================================
// Channel Layout
// ============================================================================

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelLayout {
    /// Single channel (mono)
    Mono,
    /// Two channels (stereo: left, right)
    #[default]
    Stereo,
}

impl ChannelLayout {
    /// Returns the number of channels for this layout
    pub fn num_channels(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    /// Create a ChannelLayout from a channel count
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(ChannelLayout::Mono),
            2 => Some(ChannelLayout::Stereo),
            _ => None,
        }
    }
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// One block of non-interleaved audio
///
/// # Example
/// ```
/// use auris::engine::buffer::{AudioBuffer, ChannelLayout};
///
/// let buffer = AudioBuffer::new(128, ChannelLayout::Stereo);
/// assert_eq!(buffer.channels(), 2);
/// assert_eq!(buffer.len(), 128);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a silent buffer with the specified number of samples and layout
    pub fn new(num_samples: usize, layout: ChannelLayout) -> Self {
        Self::with_sample_rate(num_samples, layout, DEFAULT_SAMPLE_RATE)
    }

    /// Create a silent buffer at a specific sample rate
    pub fn with_sample_rate(num_samples: usize, layout: ChannelLayout, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; num_samples]; layout.num_channels()],
            sample_rate,
        }
    }

    /// Create an audio buffer from interleaved sample data
    ///
    /// # Arguments
    /// * `interleaved` - Interleaved sample data (L, R, L, R, ... for stereo)
    /// * `layout` - Channel configuration
    /// * `sample_rate` - Sample rate in Hz
    pub fn from_interleaved(
        interleaved: &[f32],
        layout: ChannelLayout,
        sample_rate: u32,
    ) -> Result<Self> {
        let num_channels = layout.num_channels();

        if interleaved.len() % num_channels != 0 {
            return Err(AurisError::InvalidParameter {
                param: "interleaved".to_string(),
                value: interleaved.len().to_string(),
                expected: format!("a multiple of {} samples", num_channels),
            });
        }

        let num_samples = interleaved.len() / num_channels;
        let mut samples = vec![Vec::with_capacity(num_samples); num_channels];

        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Convert the buffer to interleaved format (L, R, L, R, ...)
    pub fn to_interleaved(&self) -> Vec<f32> {
        let num_channels = self.channels();
        let num_samples = self.len();
        let mut interleaved = Vec::with_capacity(num_channels * num_samples);

        for sample_idx in 0..num_samples {
            for channel in &self.samples {
                interleaved.push(channel[sample_idx]);
            }
        }

        interleaved
    }

    /// Get the number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Check if the buffer is empty (no samples)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Get a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds.
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Get a channel's samples mutably
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds.
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Set a single sample; returns false when out of range
    pub fn set_sample(&mut self, channel: usize, index: usize, value: f32) -> bool {
        match self.samples.get_mut(channel).and_then(|ch| ch.get_mut(index)) {
            Some(sample) => {
                *sample = value;
                true
            }
            None => false,
        }
    }

    /// Fill every channel with silence
    pub fn clear(&mut self) {
        for channel in &mut self.samples {
            channel.iter_mut().for_each(|s| *s = 0.0);
        }
    }

    /// Resize every channel to `num_samples`, zero-filling new frames
    pub fn resize(&mut self, num_samples: usize) {
        for channel in &mut self.samples {
            channel.resize(num_samples, 0.0);
        }
    }

    /// Copy another buffer's contents into this one
    ///
    /// Mono input is duplicated to both channels of a stereo destination.
    pub fn copy_from(&mut self, other: &AudioBuffer) {
        self.resize(other.len());
        let src_channels = other.channels();
        for (ch, channel) in self.samples.iter_mut().enumerate() {
            if src_channels == 0 {
                channel.iter_mut().for_each(|s| *s = 0.0);
            } else {
                channel.copy_from_slice(&other.samples[ch.min(src_channels - 1)]);
            }
        }
    }

    /// Add `other * gain` into this buffer, sample by sample
    pub fn mix_from(&mut self, other: &AudioBuffer, gain: f32) {
        let src_channels = other.channels();
        if src_channels == 0 {
            return;
        }
        for (ch, channel) in self.samples.iter_mut().enumerate() {
            let src = &other.samples[ch.min(src_channels - 1)];
            for (dst, &s) in channel.iter_mut().zip(src.iter()) {
                *dst += s * gain;
            }
        }
    }

    /// Up-mix a mono buffer to stereo; stereo buffers are returned unchanged
    pub fn into_stereo(mut self) -> Self {
        if self.channels() == 1 {
            let mono = self.samples[0].clone();
            self.samples.push(mono);
        }
        self
    }

    /// Average all channels into one mono vector
    pub fn mono_downmix(&self) -> Vec<f32> {
        let num_channels = self.channels();
        if num_channels == 0 {
            return Vec::new();
        }
        (0..self.len())
            .map(|i| self.samples.iter().map(|ch| ch[i]).sum::<f32>() / num_channels as f32)
            .collect()
    }

    /// Check all samples are finite (no NaN or Inf)
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|s| s.is_finite())
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new(0, ChannelLayout::Stereo)
    }
}

// ============================================================================
// Tests
// ============================================================================
