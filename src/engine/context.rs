//! Audio graph handle
//!
//! The processing context a pipeline renders on. It owns the graph clock
//! and the `running`/`closed` state the registry inspects.

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

/// Processing state of a graph handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Running,
    Closed,
}

/// Owner of one real-time processing context
#[derive(Debug)]
pub struct AudioGraphHandle {
    id: Uuid,
    sample_rate: u32,
    render_quantum: usize,
    state: GraphState,
    created_at: DateTime<Utc>,
    frames_rendered: u64,
}

impl AudioGraphHandle {
    pub fn new(sample_rate: u32, render_quantum: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            sample_rate,
            render_quantum: render_quantum.max(1),
            state: GraphState::Running,
            created_at: Utc::now(),
            frames_rendered: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn render_quantum(&self) -> usize {
        self.render_quantum
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == GraphState::Closed
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Graph clock in seconds
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    /// Advance the clock after rendering `frames`
    pub fn advance(&mut self, frames: usize) {
        self.frames_rendered += frames as u64;
    }

    /// Close the context
    ///
    /// Closing twice, or closing an already-closed handle, is a no-op.
    pub fn close(&mut self) {
        if self.state == GraphState::Closed {
            debug!(graph = %self.id, "graph handle already closed");
            return;
        }
        self.state = GraphState::Closed;
        debug!(
            graph = %self.id,
            frames = self.frames_rendered,
            "graph handle closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_handle_is_running() {
        let handle = AudioGraphHandle::new(48000, 128);
        assert_eq!(handle.state(), GraphState::Running);
        assert_eq!(handle.current_time(), 0.0);
        assert!(handle.created_at() <= Utc::now());
    }

    #[test]
    fn test_clock_advances() {
        let mut handle = AudioGraphHandle::new(48000, 128);
        handle.advance(24000);
        assert_eq!(handle.current_time(), 0.5);
        assert_eq!(handle.frames_rendered(), 24000);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut handle = AudioGraphHandle::new(48000, 128);
        handle.close();
        handle.close();
        assert!(handle.is_closed());
    }
}
