//! Capture-handle providers

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// Browser tab identifier
pub type TabId = u32;

/// Grants access to a tab's live audio
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Acquire a capture stream identifier for `tab`
    ///
    /// Fails with `AcquisitionConflict` while the tab is captured elsewhere.
    async fn acquire(&self, tab: TabId) -> Result<String>;
}

/// Issues a fresh random stream identifier for every acquisition
#[derive(Debug, Default, Clone)]
pub struct UuidCaptureProvider;

#[async_trait]
impl CaptureProvider for UuidCaptureProvider {
    async fn acquire(&self, tab: TabId) -> Result<String> {
        Ok(format!("tab{}-{}", tab, Uuid::new_v4().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uuid_provider_issues_distinct_ids() {
        let provider = UuidCaptureProvider;
        let a = provider.acquire(3).await.unwrap();
        let b = provider.acquire(3).await.unwrap();
        assert!(a.starts_with("tab3-"));
        assert_ne!(a, b);
    }
}
