//! Capture coordination
//!
//! Maps browser tabs to capture streams in front of the orchestrator:
//! - Stream id acquisition, caching and persistence
//! - Bounded retry with global teardown on capture conflicts
//! - Per-tab gain bookkeeping
//! - Routing of tab-addressed UI events

pub mod cache;
pub mod gains;
pub mod provider;
pub mod retry;
pub mod router;
pub mod store;

pub use cache::{StreamIdCache, STREAM_ID_KEY};
pub use gains::{GainBook, GAIN_KEY};
pub use provider::{CaptureProvider, TabId, UuidCaptureProvider};
pub use retry::{AcquisitionRetry, RetryStep};
pub use router::{CaptureMessage, CaptureRouter, CAPTURE_EVENTS};
pub use store::{JsonFileStore, MemorySessionStore, SessionStore};
