//! Platform transport abstraction
//!
//! A transport delivers one item to one platform and fetches engagement
//! metrics. The wire protocol for each network lives behind this trait and
//! is not part of the core; the crate ships the dry-run transport (full
//! pipeline, zero network effects) and a scriptable mock for tests.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{MetricSample, Platform};

pub mod dry_run;
pub mod limits;
pub mod mock;

pub use dry_run::DryRunTransport;
pub use mock::MockTransport;

/// One item ready for delivery to a platform.
#[derive(Debug, Clone)]
pub struct PublishItem {
    pub content_id: String,
    pub platform: Platform,
    pub title: String,
    pub body: String,
    pub media_ref: Option<String>,
}

/// Proof of a successful delivery.
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    pub platform: Platform,
    pub published_id: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one item. Implementations enforce the platform constraint
    /// table via [`limits::validate`] before any network effect; violations
    /// are reported, never silently truncated.
    async fn publish(
        &self,
        item: &PublishItem,
    ) -> std::result::Result<PublishReceipt, TransportError>;

    /// Fetch engagement samples recorded since `since`.
    async fn fetch_metrics(
        &self,
        platform: Platform,
        since: i64,
    ) -> std::result::Result<Vec<MetricSample>, TransportError>;

    /// Lowercase transport identifier for logs.
    fn name(&self) -> &str;
}
