//! Periodic per-frame callbacks
//!
//! Every live pipeline registers one listener that renders the audio elapsed
//! since the previous tick. The scheduler ticks on a tokio interval and
//! passes each listener the elapsed time in milliseconds.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// Handle returned by [`Scheduler::add`]
pub type ListenerId = u64;

type Listener = Box<dyn FnMut(f64) + Send>;

#[derive(Default)]
struct SchedulerInner {
    listeners: Mutex<BTreeMap<ListenerId, Listener>>,
    next_id: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Shared tick source; clones refer to the same listener set
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener called with the elapsed milliseconds on every tick
    pub fn add(&self, listener: impl FnMut(f64) + Send + 'static) -> ListenerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, Box::new(listener));
        id
    }

    /// Unregister a listener; returns false if it was not registered
    pub fn remove(&self, id: ListenerId) -> bool {
        self.inner.listeners.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener once
    pub fn tick(&self, delta_ms: f64) {
        let mut listeners = self.inner.listeners.lock();
        for listener in listeners.values_mut() {
            listener(delta_ms);
        }
    }

    /// Start ticking every `period` on the current tokio runtime
    ///
    /// Starting a running scheduler does nothing.
    pub fn start(&self, period: Duration) {
        let mut task = self.inner.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        *task = Some(tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = Instant::now();
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let now = Instant::now();
                let delta_ms = now.duration_since(last).as_secs_f64() * 1000.0;
                last = now;
                Scheduler { inner }.tick(delta_ms);
            }
        }));
        debug!(period_ms = period.as_millis() as u64, "Scheduler started");
    }

    pub fn stop(&self) {
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
            debug!("Scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_add_tick_remove() {
        let scheduler = Scheduler::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = scheduler.add(move |delta| {
            assert_eq!(delta, 50.0);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.tick(50.0);
        scheduler.tick(50.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(scheduler.remove(id));
        assert!(!scheduler.remove(id));
        scheduler.tick(50.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticks_with_elapsed_time() {
        let scheduler = Scheduler::new();
        let total = Arc::new(Mutex::new(0.0_f64));
        let sum = Arc::clone(&total);
        scheduler.add(move |delta| *sum.lock() += delta);

        scheduler.start(Duration::from_millis(50));
        assert!(scheduler.is_running());
        time::sleep(Duration::from_millis(220)).await;
        scheduler.stop();

        let elapsed = *total.lock();
        assert!((elapsed - 200.0).abs() < 1.0, "elapsed {}", elapsed);
        assert!(!scheduler.is_running());
    }
}
