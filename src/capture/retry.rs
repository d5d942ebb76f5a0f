//! Bounded acquisition retry
//!
//! ```text
//! conflict ─► retry (×max_retries, fixed delay) ─► global teardown + cooldown
//!          ─► final attempt ─► give up
//! ```

use std::time::Duration;

use crate::config::RetryPolicy;

/// What to do after an acquisition conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Wait, then try again
    Retry(Duration),
    /// Close every pipeline, wait out the cooldown, then make the final attempt
    Teardown { cooldown: Duration },
    /// All paths exhausted
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct AcquisitionRetry {
    policy: RetryPolicy,
    retries: u32,
    torn_down: bool,
    conflicts: u32,
}

impl AcquisitionRetry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retries: 0,
            torn_down: false,
            conflicts: 0,
        }
    }

    /// Advance after a conflict
    pub fn on_conflict(&mut self) -> RetryStep {
        self.conflicts += 1;
        if self.retries < self.policy.max_retries {
            self.retries += 1;
            RetryStep::Retry(self.policy.retry_delay())
        } else if !self.torn_down {
            self.torn_down = true;
            RetryStep::Teardown {
                cooldown: self.policy.cooldown(),
            }
        } else {
            RetryStep::GiveUp
        }
    }

    /// Conflicts seen so far
    pub fn conflicts(&self) -> u32 {
        self.conflicts
    }

    pub fn has_torn_down(&self) -> bool {
        self.torn_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let mut retry = AcquisitionRetry::new(RetryPolicy::default());
        let delay = Duration::from_millis(60);
        assert_eq!(retry.on_conflict(), RetryStep::Retry(delay));
        assert_eq!(retry.on_conflict(), RetryStep::Retry(delay));
        assert_eq!(
            retry.on_conflict(),
            RetryStep::Teardown {
                cooldown: Duration::from_millis(200)
            }
        );
        assert!(retry.has_torn_down());
        assert_eq!(retry.on_conflict(), RetryStep::GiveUp);
        assert_eq!(retry.on_conflict(), RetryStep::GiveUp);
        assert_eq!(retry.conflicts(), 5);
    }

    #[test]
    fn test_zero_retries_goes_straight_to_teardown() {
        let mut retry = AcquisitionRetry::new(RetryPolicy {
            max_retries: 0,
            ..Default::default()
        });
        assert!(matches!(retry.on_conflict(), RetryStep::Teardown { .. }));
        assert_eq!(retry.on_conflict(), RetryStep::GiveUp);
    }
}
