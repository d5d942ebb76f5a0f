//! Auris - Per-stream audio enhancement pipelines
//!
//! Auris builds one processing graph per captured audio stream and drives it
//! through a small JSON event surface:
//! 1. Tone controls, a 10-band equalizer and an anti-distortion guard
//! 2. Optional spatial effects (8D rotation, stereo widening, echo)
//!
//! # Architecture
//!
//! - `engine`: buffers, graph clock, automatable parameters, media endpoints
//! - `dsp`: the processing components and their traits
//! - `pipeline`: assembly of one graph per stream
//! - `orchestrator`: registry of pipelines and the event surface
//! - `capture`: tab to stream mapping in front of the orchestrator

pub mod capture;
pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod pipeline;

pub use config::EngineConfig;
pub use error::{AurisError, Result};
pub use orchestrator::Orchestrator;
pub use pipeline::{Pipeline, PipelineParams};
