//! Engine configuration
//!
//! All timing and threshold constants of the engine live here so that tests
//! and the CLI can tune them. Defaults reproduce the production behaviour.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AurisError, Result};

/// Bounded retry policy for capture acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Plain retries after an acquisition conflict
    pub max_retries: u32,
    /// Delay between plain retries (ms)
    pub retry_delay_ms: u64,
    /// Wait after a global teardown before the final attempt (ms)
    pub cooldown_ms: u64,
    /// Acquisitions started within this window after a global teardown wait (ms)
    pub grace_window_ms: u64,
    /// Total time since the teardown an acquisition waits for (ms)
    pub grace_wait_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 60,
            cooldown_ms: 200,
            grace_window_ms: 150,
            grace_wait_ms: 160,
        }
    }
}

impl RetryPolicy {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Remaining grace wait for an acquisition started `since` after a teardown
    pub fn grace_remaining(&self, since: Duration) -> Option<Duration> {
        let since_ms = since.as_millis() as u64;
        if since_ms < self.grace_window_ms {
            Some(Duration::from_millis(
                self.grace_wait_ms.saturating_sub(since_ms),
            ))
        } else {
            None
        }
    }
}

/// Audio-activity heuristic thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusPolicy {
    /// Linear RMS above which audio counts as present (about -52 dBFS)
    pub rms_threshold: f32,
    /// Activity within this window counts as present (ms)
    pub recency_ms: u64,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            rms_threshold: 0.0025,
            recency_ms: 5000,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Processing sample rate in Hz
    pub sample_rate: u32,
    /// Frames per render quantum (k-rate parameter granularity)
    pub render_quantum: usize,
    /// Telemetry tap analysis window in samples
    pub meter_window: usize,
    /// Per-frame callback period (ms)
    pub scheduler_period_ms: u64,
    pub status: StatusPolicy,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            render_quantum: 128,
            meter_window: 2048,
            scheduler_period_ms: 50,
            status: StatusPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a JSON configuration file
    ///
    /// Missing fields fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AurisError::Config {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a JSON configuration string
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text).map_err(|e| AurisError::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(8000..=192_000).contains(&self.sample_rate) {
            return Err(AurisError::Config {
                reason: format!("sample_rate {} outside 8000-192000 Hz", self.sample_rate),
            });
        }
        if self.render_quantum == 0 || self.render_quantum > 4096 {
            return Err(AurisError::Config {
                reason: format!("render_quantum {} outside 1-4096", self.render_quantum),
            });
        }
        if self.meter_window == 0 {
            return Err(AurisError::Config {
                reason: "meter_window must be positive".to_string(),
            });
        }
        if self.scheduler_period_ms == 0 {
            return Err(AurisError::Config {
                reason: "scheduler_period_ms must be positive".to_string(),
            });
        }
        if !(self.status.rms_threshold.is_finite() && self.status.rms_threshold >= 0.0) {
            return Err(AurisError::Config {
                reason: "status.rms_threshold must be a non-negative number".to_string(),
            });
        }
        Ok(())
    }

    pub fn scheduler_period(&self) -> Duration {
        Duration::from_millis(self.scheduler_period_ms)
    }

    pub fn recency_window(&self) -> Duration {
        Duration::from_millis(self.status.recency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.meter_window, 2048);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.cooldown_ms, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(r#"{"sample_rate": 44100, "retry": {"cooldown_ms": 250}}"#)
            .unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.retry.cooldown_ms, 250);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.status.recency_ms, 5000);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = EngineConfig::from_json_str(r#"{"render_quantum": 0}"#).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"scheduler_period_ms": 20}}"#).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.scheduler_period(), Duration::from_millis(20));
    }

    #[test]
    fn test_grace_remaining() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.grace_remaining(Duration::from_millis(40)),
            Some(Duration::from_millis(120))
        );
        assert_eq!(policy.grace_remaining(Duration::from_millis(150)), None);
    }
}
