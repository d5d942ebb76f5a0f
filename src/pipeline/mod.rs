//! Per-stream processing pipelines
//!
//! - Assembly of the DSP components into one graph per captured stream
//! - Control surface (gain, EQ, tone, effects)
//! - Rendering from source to sink, with an RMS telemetry tap

mod assembler;
pub mod telemetry;

pub use assembler::{Pipeline, PipelineParams};
pub use telemetry::RmsMeter;
