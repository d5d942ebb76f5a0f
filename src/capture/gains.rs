//! Per-tab gain bookkeeping
//!
//! Normalized gain per tab (1.0 is 100 %) under one session-store key, for
//! UI surfaces that show the current boost without asking the engine.

use std::sync::Arc;

use serde_json::Value;

use super::provider::TabId;
use super::store::{read_map, SessionStore};
use crate::error::Result;

/// Session-store key of the gain map
pub const GAIN_KEY: &str = "aurisGainByTab";

pub struct GainBook {
    store: Arc<dyn SessionStore>,
    lock: tokio::sync::Mutex<()>,
}

impl GainBook {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Record a normalized gain, floored at zero
    pub async fn set_normalized(&self, tab: TabId, gain: f32) -> Result<()> {
        if !gain.is_finite() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let mut map = read_map(self.store.as_ref(), GAIN_KEY).await?;
        map.insert(tab.to_string(), Value::from(gain.max(0.0) as f64));
        self.store.set(GAIN_KEY, Value::Object(map)).await
    }

    /// Record a volume boost in percent (100 to 800 maps to 1.0 to 8.0)
    pub async fn set_percent(&self, tab: TabId, percent: f32) -> Result<()> {
        self.set_normalized(tab, percent / 100.0).await
    }

    pub async fn get(&self, tab: TabId) -> Result<Option<f32>> {
        let map = read_map(self.store.as_ref(), GAIN_KEY).await?;
        Ok(map
            .get(&tab.to_string())
            .and_then(Value::as_f64)
            .map(|g| g as f32))
    }

    pub async fn remove(&self, tab: TabId) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = read_map(self.store.as_ref(), GAIN_KEY).await?;
        if map.remove(&tab.to_string()).is_some() {
            self.store.set(GAIN_KEY, Value::Object(map)).await?;
        }
        Ok(())
    }
}
