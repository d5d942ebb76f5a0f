//! Media endpoints of a pipeline
//!
//! A pipeline pulls captured audio from a [`StreamSource`] and pushes its
//! rendered master output into an [`AudioSink`] (the "destination").
//! WAV files are supported on both ends through `hound`; everything is
//! converted to 32-bit float stereo at the engine sample rate.
//! Sample rate conversion uses linear interpolation.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use parking_lot::Mutex;

use crate::engine::buffer::{AudioBuffer, ChannelLayout};
use crate::error::{AurisError, Result};

// ============================================================================
// Traits
// ============================================================================

/// Captured audio entering a pipeline
pub trait StreamSource: Send {
    /// Fill `out` with the next block
    ///
    /// `out` is stereo and already sized to the block length. Frames past
    /// the end of the stream are left silent. Returns the number of frames
    /// that carried real audio.
    fn read(&mut self, out: &mut AudioBuffer) -> usize;

    /// True once the source will only produce silence
    fn is_ended(&self) -> bool {
        false
    }

    /// Release the underlying capture
    fn close(&mut self) {}
}

/// Rendered output leaving a pipeline
pub trait AudioSink: Send {
    /// Consume one rendered block
    fn write(&mut self, block: &AudioBuffer) -> Result<()>;

    /// Flush and release the sink. Called once on teardown.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The media endpoints opened for one capture stream
pub struct MediaStream {
    pub source: Box<dyn StreamSource>,
    pub sink: Box<dyn AudioSink>,
}

impl MediaStream {
    pub fn new(source: impl StreamSource + 'static, sink: impl AudioSink + 'static) -> Self {
        Self {
            source: Box::new(source),
            sink: Box::new(sink),
        }
    }

    /// Silence in, nothing out
    pub fn silent() -> Self {
        Self::new(SilentSource, NullSink)
    }
}

// ============================================================================
// Sources
// ============================================================================

/// A source that never produces sound
#[derive(Debug, Default)]
pub struct SilentSource;

impl StreamSource for SilentSource {
    fn read(&mut self, out: &mut AudioBuffer) -> usize {
        out.clear();
        0
    }
}

/// In-memory source, optionally looping
#[derive(Debug, Clone)]
pub struct BufferSource {
    audio: AudioBuffer,
    position: usize,
    looping: bool,
}

impl BufferSource {
    /// Play `audio` once; mono input is up-mixed
    pub fn new(audio: AudioBuffer) -> Self {
        Self {
            audio: audio.into_stereo(),
            position: 0,
            looping: false,
        }
    }

    /// Play `audio` forever
    pub fn looping(audio: AudioBuffer) -> Self {
        Self {
            looping: true,
            ..Self::new(audio)
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

impl StreamSource for BufferSource {
    fn read(&mut self, out: &mut AudioBuffer) -> usize {
        out.clear();
        let total = self.audio.len();
        if total == 0 {
            return 0;
        }
        let frames = out.len();
        let mut written = 0;
        while written < frames {
            if self.position >= total {
                if !self.looping {
                    break;
                }
                self.position = 0;
            }
            let n = (frames - written).min(total - self.position);
            for ch in 0..out.channels() {
                let src = &self.audio.channel(ch)[self.position..self.position + n];
                out.channel_mut(ch)[written..written + n].copy_from_slice(src);
            }
            written += n;
            self.position += n;
        }
        written
    }

    fn is_ended(&self) -> bool {
        !self.looping && self.position >= self.audio.len()
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Discards everything
#[derive(Debug, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn write(&mut self, _block: &AudioBuffer) -> Result<()> {
        Ok(())
    }
}

/// Appends every block to a shared buffer
#[derive(Debug, Clone)]
pub struct CollectingSink {
    collected: Arc<Mutex<AudioBuffer>>,
}

impl CollectingSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            collected: Arc::new(Mutex::new(AudioBuffer::with_sample_rate(
                0,
                ChannelLayout::Stereo,
                sample_rate,
            ))),
        }
    }

    /// Shared handle to the collected audio; stays valid after the pipeline closes
    pub fn handle(&self) -> Arc<Mutex<AudioBuffer>> {
        Arc::clone(&self.collected)
    }

    /// Copy of everything collected so far
    pub fn snapshot(&self) -> AudioBuffer {
        self.collected.lock().clone()
    }
}

impl AudioSink for CollectingSink {
    fn write(&mut self, block: &AudioBuffer) -> Result<()> {
        let mut collected = self.collected.lock();
        for (ch, channel) in collected.samples.iter_mut().enumerate() {
            let src = ch.min(block.channels().saturating_sub(1));
            if let Some(data) = block.samples.get(src) {
                channel.extend_from_slice(data);
            }
        }
        Ok(())
    }
}

/// Streams rendered audio into a 32-bit float WAV file
pub struct WavSink {
    writer: Option<WavWriter<BufWriter<File>>>,
}

impl WavSink {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(path, spec)?;
        Ok(Self {
            writer: Some(writer),
        })
    }
}

impl AudioSink for WavSink {
    fn write(&mut self, block: &AudioBuffer) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| AurisError::Wav {
            reason: "write after finish".to_string(),
        })?;
        for sample in block.to_interleaved() {
            writer.write_sample(sample)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

// ============================================================================
// WAV import / export
// ============================================================================

/// Import a WAV file as stereo float audio at `target_rate`
///
/// # Errors
/// * `Io` - If the file does not exist
/// * `Wav` - If the file cannot be decoded
/// * `InvalidParameter` - For more than two channels
pub fn import_wav(path: &Path, target_rate: u32) -> Result<AudioBuffer> {
    if !path.exists() {
        return Err(AurisError::Io {
            reason: format!("file not found: {}", path.display()),
        });
    }

    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    let layout = ChannelLayout::from_count(channels).ok_or_else(|| AurisError::InvalidParameter {
        param: "channels".to_string(),
        value: channels.to_string(),
        expected: "mono or stereo".to_string(),
    })?;

    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    let mut buffer = AudioBuffer::from_interleaved(&interleaved, layout, spec.sample_rate)?;

    if spec.sample_rate != target_rate {
        let ratio = target_rate as f64 / spec.sample_rate as f64;
        buffer.samples = buffer
            .samples
            .iter()
            .map(|channel| resample_linear(channel, ratio))
            .collect();
        buffer.sample_rate = target_rate;
    }

    Ok(buffer.into_stereo())
}

/// Write `buffer` as a 32-bit float WAV file
pub fn export_wav(buffer: &AudioBuffer, path: &Path) -> Result<()> {
    let mut sink = WavSink::create(path, buffer.sample_rate)?;
    sink.write(buffer)?;
    sink.finish()
}

/// Generate a mono sine test tone
///
/// # Arguments
/// * `frequency` - Frequency of the sine wave in Hz
/// * `amplitude` - Peak amplitude
/// * `duration_secs` - Duration of the tone in seconds
/// * `sample_rate` - Sample rate in Hz
pub fn generate_test_tone(
    frequency: f32,
    amplitude: f32,
    duration_secs: f32,
    sample_rate: u32,
) -> AudioBuffer {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let mut buffer = AudioBuffer::with_sample_rate(num_samples, ChannelLayout::Mono, sample_rate);
    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;

    for (i, sample) in buffer.samples[0].iter_mut().enumerate() {
        *sample = amplitude * (angular_freq * i as f32).sin();
    }

    buffer
}

// ============================================================================
// Internal helper functions
// ============================================================================

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let samples = match sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = match bits_per_sample {
                8 => 128.0,
                16 => 32768.0,
                24 => 8388608.0,
                32 => 2147483648.0,
                other => {
                    return Err(AurisError::Wav {
                        reason: format!("unsupported {}-bit integer audio", other),
                    })
                }
            };
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    Ok(samples)
}

/// Linear interpolation resampling
fn resample_linear(samples: &[f32], ratio: f64) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let source_len = samples.len();
    let target_len = ((source_len as f64) * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(target_len);

    for i in 0..target_len {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < source_len {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else if src_idx < source_len {
            samples[src_idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn test_buffer_source_reads_then_ends() {
        let tone = generate_test_tone(440.0, 0.5, 0.01, 48000);
        let total = tone.len();
        let mut source = BufferSource::new(tone);
        let mut block = AudioBuffer::new(128, ChannelLayout::Stereo);

        let mut frames = 0;
        while !source.is_ended() {
            frames += source.read(&mut block);
        }
        assert_eq!(frames, total);
        assert_eq!(source.read(&mut block), 0);
        assert!(block.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_looping_source_wraps() {
        let audio = AudioBuffer::from_interleaved(&[1.0, 2.0, 3.0], ChannelLayout::Mono, 48000)
            .unwrap();
        let mut source = BufferSource::looping(audio);
        let mut block = AudioBuffer::new(5, ChannelLayout::Stereo);
        assert_eq!(source.read(&mut block), 5);
        assert_eq!(block.channel(0), &[1.0, 2.0, 3.0, 1.0, 2.0]);
        assert_eq!(block.channel(1), &[1.0, 2.0, 3.0, 1.0, 2.0]);
        assert!(!source.is_ended());
    }

    #[test]
    fn test_collecting_sink_appends() {
        let mut sink = CollectingSink::new(48000);
        let block = AudioBuffer::from_interleaved(&[0.1, 0.2, 0.3, 0.4], ChannelLayout::Stereo, 48000)
            .unwrap();
        sink.write(&block).unwrap();
        sink.write(&block).unwrap();
        let collected = sink.snapshot();
        assert_eq!(collected.len(), 4);
        assert_eq!(collected.channel(1), &[0.2, 0.4, 0.2, 0.4]);
    }

    #[test]
    fn test_wav_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let tone = generate_test_tone(440.0, 0.5, 0.1, 48000).into_stereo();

        export_wav(&tone, &path).unwrap();
        let imported = import_wav(&path, 48000).unwrap();

        assert_eq!(imported.len(), tone.len());
        assert_eq!(imported.channels(), 2);
        for (a, b) in tone.channel(0).iter().zip(imported.channel(0)) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_import_resamples_16bit_mono() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 24000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..2400 {
            writer.write_sample(16384_i16).unwrap();
        }
        writer.finalize().unwrap();

        let imported = import_wav(&path, 48000).unwrap();
        assert_eq!(imported.sample_rate, 48000);
        assert_eq!(imported.len(), 4800);
        assert_relative_eq!(imported.channel(1)[100], 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_import_missing_file() {
        let err = import_wav(Path::new("/nonexistent/input.wav"), 48000).unwrap_err();
        assert_eq!(err.error_code(), "IO_ERROR");
    }
}
