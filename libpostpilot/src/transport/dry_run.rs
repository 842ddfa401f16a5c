//! Dry-run transport
//!
//! Synthesizes successful outcomes without any network call, so the full
//! pipeline can be exercised without live credentials. Indistinguishable to
//! the caller from a real transport except for the `dry-` id prefix.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::TransportError;
use crate::transport::{limits, PublishItem, PublishReceipt, Transport};
use crate::types::{MetricSample, Platform};

pub struct DryRunTransport;

impl DryRunTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DryRunTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic fake id for a (platform, content) pair.
fn synthesize_id(platform: Platform, content_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(platform.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(content_id.as_bytes());
    let digest = hasher.finalize();
    let short: String = digest[..6].iter().map(|b| format!("{:02x}", b)).collect();
    format!("dry-{}-{}", platform, short)
}

#[async_trait]
impl Transport for DryRunTransport {
    async fn publish(&self, item: &PublishItem) -> Result<PublishReceipt, TransportError> {
        // Constraints are enforced exactly as a live transport would.
        limits::validate(item)?;

        let published_id = synthesize_id(item.platform, &item.content_id);
        info!(
            platform = %item.platform,
            content_id = %item.content_id,
            published_id = %published_id,
            "dry-run publish"
        );
        Ok(PublishReceipt {
            platform: item.platform,
            published_id,
        })
    }

    async fn fetch_metrics(
        &self,
        _platform: Platform,
        _since: i64,
    ) -> Result<Vec<MetricSample>, TransportError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}
