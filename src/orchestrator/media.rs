//! Media providers
//!
//! Opening a pipeline's media (the captured stream and its destination) is
//! the suspension point of pipeline creation.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::engine::io::import_wav;
use crate::engine::{BufferSource, MediaStream, NullSink, WavSink};
use crate::error::{AurisError, Result};

/// Opens the media endpoints for a capture stream
#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn open(&self, stream_id: &str) -> Result<MediaStream>;
}

/// Silence in, nothing out. Useful for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct SilentMediaProvider;

#[async_trait]
impl MediaProvider for SilentMediaProvider {
    async fn open(&self, _stream_id: &str) -> Result<MediaStream> {
        Ok(MediaStream::silent())
    }
}

/// Plays a WAV file once and optionally writes the rendered output to another
#[derive(Debug, Clone)]
pub struct WavFileProvider {
    input: PathBuf,
    output: Option<PathBuf>,
    sample_rate: u32,
}

impl WavFileProvider {
    pub fn new(input: impl Into<PathBuf>, output: Option<PathBuf>, sample_rate: u32) -> Self {
        Self {
            input: input.into(),
            output,
            sample_rate,
        }
    }
}

#[async_trait]
impl MediaProvider for WavFileProvider {
    async fn open(&self, stream_id: &str) -> Result<MediaStream> {
        let input = self.input.clone();
        let rate = self.sample_rate;
        let audio = tokio::task::spawn_blocking(move || import_wav(&input, rate))
            .await
            .map_err(|e| AurisError::MediaUnavailable {
                stream_id: stream_id.to_string(),
                reason: e.to_string(),
            })??;

        debug!(
            stream_id,
            input = %self.input.display(),
            frames = audio.len(),
            "Opened WAV source"
        );

        let source = BufferSource::new(audio);
        match &self.output {
            Some(path) => Ok(MediaStream::new(source, WavSink::create(path, rate)?)),
            None => Ok(MediaStream::new(source, NullSink)),
        }
    }
}
