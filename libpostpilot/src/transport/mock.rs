//! Mock transport for testing
//!
//! Configurable behaviors for exercising retry, failure and credential
//! paths without network access. Available for all builds so crate-level
//! integration tests can use it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::TransportError;
use crate::external::AccountDirectory;
use crate::transport::{limits, PublishItem, PublishReceipt, Transport};
use crate::types::{MetricSample, Platform};

pub struct MockTransport {
    name: String,
    /// Scripted outcomes consumed one per publish call; once exhausted,
    /// every call succeeds.
    script: Mutex<VecDeque<Result<(), TransportError>>>,
    directory: Option<Arc<dyn AccountDirectory>>,
    publish_calls: Mutex<usize>,
    published: Mutex<Vec<PublishItem>>,
    metrics: Mutex<Vec<MetricSample>>,
}

impl MockTransport {
    /// A transport where every publish succeeds.
    pub fn succeeding() -> Self {
        Self::with_script(Vec::new())
    }

    /// A transport that replays the given outcomes, then succeeds.
    pub fn with_script(script: Vec<Result<(), TransportError>>) -> Self {
        Self {
            name: "mock".to_string(),
            script: Mutex::new(script.into()),
            directory: None,
            publish_calls: Mutex::new(0),
            published: Mutex::new(Vec::new()),
            metrics: Mutex::new(Vec::new()),
        }
    }

    /// A transport that fails every publish with clones of `error`.
    pub fn failing(error: TransportError, times: usize) -> Self {
        Self::with_script(vec![Err(error); times])
    }

    /// Require a linked credential before accepting a publish.
    pub fn with_directory(mut self, directory: Arc<dyn AccountDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn set_metrics(&self, samples: Vec<MetricSample>) {
        *self.metrics.lock().unwrap() = samples;
    }

    pub fn publish_calls(&self) -> usize {
        *self.publish_calls.lock().unwrap()
    }

    pub fn published(&self) -> Vec<PublishItem> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(&self, item: &PublishItem) -> Result<PublishReceipt, TransportError> {
        let call = {
            let mut calls = self.publish_calls.lock().unwrap();
            *calls += 1;
            *calls
        };

        if let Some(directory) = &self.directory {
            let credential = directory
                .credential(item.platform)
                .await
                .map_err(|e| TransportError::Permanent(e.to_string()))?;
            if credential.is_none() {
                return Err(TransportError::Credential(format!(
                    "no credential linked for {}",
                    item.platform
                )));
            }
        }

        limits::validate(item)?;

        if let Some(Err(error)) = self.script.lock().unwrap().pop_front() {
            return Err(error);
        }

        self.published.lock().unwrap().push(item.clone());
        Ok(PublishReceipt {
            platform: item.platform,
            published_id: format!("mock-{}-{}", item.platform, call),
        })
    }

    async fn fetch_metrics(
        &self,
        platform: Platform,
        since: i64,
    ) -> Result<Vec<MetricSample>, TransportError> {
        Ok(self
            .metrics
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.platform == platform && s.captured_at >= since)
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
