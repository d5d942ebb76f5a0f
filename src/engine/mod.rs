//! Audio Engine Module
//!
//! Rendering primitives shared by every DSP component:
//! - Audio buffer management
//! - Graph handle and clock
//! - Automatable parameters
//! - Declarative wiring
//! - Media sources and sinks

pub mod buffer;
pub mod context;
pub mod io;
pub mod param;
pub mod topology;

pub use buffer::{AudioBuffer, ChannelLayout};
pub use context::{AudioGraphHandle, GraphState};
pub use io::{
    export_wav, generate_test_tone, import_wav, AudioSink, BufferSource, CollectingSink,
    MediaStream, NullSink, SilentSource, StreamSource, WavSink,
};
pub use param::AudioParam;
pub use topology::{Topology, TopologyDiff, Wiring};
