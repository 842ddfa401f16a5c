//! Interfaces to external collaborators
//!
//! The scheduler core touches content and credentials only through these
//! traits. Content text and status are owned by the content store; the core
//! reads the fields once per attempt and writes back only the terminal
//! status. Credentials are resolved by the account directory and consulted
//! by the platform transport, not by the worker.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ContentItem, ContentStatus, Platform};

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get_content(&self, content_id: &str) -> Result<Option<ContentItem>>;

    /// Write back a terminal status (`published`, `held`, `error`).
    async fn set_status(
        &self,
        content_id: &str,
        status: ContentStatus,
        reason: Option<&str>,
    ) -> Result<()>;
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Resolve the transport credential for a platform, if one is linked.
    async fn credential(&self, platform: Platform) -> Result<Option<String>>;
}

/// Fixed credential map, for tests and single-account deployments.
pub struct StaticAccountDirectory {
    credentials: HashMap<Platform, String>,
}

impl StaticAccountDirectory {
    pub fn new(credentials: HashMap<Platform, String>) -> Self {
        Self { credentials }
    }

    pub fn empty() -> Self {
        Self {
            credentials: HashMap::new(),
        }
    }

    pub fn with_credential(mut self, platform: Platform, token: impl Into<String>) -> Self {
        self.credentials.insert(platform, token.into());
        self
    }
}

#[async_trait]
impl AccountDirectory for StaticAccountDirectory {
    async fn credential(&self, platform: Platform) -> Result<Option<String>> {
        Ok(self.credentials.get(&platform).cloned())
    }
}
