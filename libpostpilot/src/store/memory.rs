//! In-memory store for tests and embedded use

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::external::ContentStore;
use crate::idempotency::{IdempotencyRecord, LedgerStatus, ReserveOutcome};
use crate::store::{IdempotencyStore, JobStore};
use crate::types::{ContentItem, ContentStatus, Job, JobStatus};

/// Mutex-guarded maps implementing all three storage traits.
///
/// The single lock per map is what makes `reserve` atomic: concurrent
/// callers for one key serialize on it.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<String, Job>>,
    ledger: Mutex<HashMap<String, IdempotencyRecord>>,
    contents: Mutex<HashMap<String, ContentItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a content item. Insertion is an owner-side operation and is
    /// deliberately not part of the [`ContentStore`] trait.
    pub fn add_content(&self, item: ContentItem) {
        self.contents.lock().unwrap().insert(item.id.clone(), item);
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        self.jobs.lock().unwrap().insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(job_id).cloned())
    }

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .find(|j| j.idempotency_key == idempotency_key)
            .cloned())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        self.jobs.lock().unwrap().insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn due(&self, cutoff: i64, limit: u32) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap();
        let mut due: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.run_at <= cutoff)
            .cloned()
            .collect();
        due.sort_by_key(|j| j.run_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn list(&self, status: Option<JobStatus>, limit: u32) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap();
        let mut listed: Vec<Job> = jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        listed.sort_by_key(|j| (j.run_at, j.created_at));
        listed.truncate(limit as usize);
        Ok(listed)
    }

    async fn stale_running(&self, older_than: i64) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| j.status == JobStatus::Running && j.updated_at < older_than)
            .cloned()
            .collect())
    }

    async fn status_counts(&self) -> Result<HashMap<JobStatus, u32>> {
        let jobs = self.jobs.lock().unwrap();
        let mut counts = HashMap::new();
        for job in jobs.values() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn reserve(&self, key: &str, now: i64, ttl_secs: i64) -> Result<ReserveOutcome> {
        let mut ledger = self.ledger.lock().unwrap();

        if let Some(record) = ledger.get(key) {
            if now - record.created_at < ttl_secs {
                return Ok(ReserveOutcome::Existing(record.clone()));
            }
            // Expired: logically absent, drop and fall through to reserve.
            ledger.remove(key);
        }

        ledger.insert(
            key.to_string(),
            IdempotencyRecord {
                key: key.to_string(),
                status: LedgerStatus::Pending,
                result: None,
                created_at: now,
            },
        );
        Ok(ReserveOutcome::Reserved)
    }

    async fn commit(&self, key: &str, status: LedgerStatus, result: &str) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        if let Some(record) = ledger.get_mut(key) {
            if record.status == LedgerStatus::Pending {
                record.status = status;
                record.result = Some(result.to_string());
            }
        }
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        if ledger
            .get(key)
            .is_some_and(|r| r.status == LedgerStatus::Pending)
        {
            ledger.remove(key);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.ledger.lock().unwrap().get(key).cloned())
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get_content(&self, content_id: &str) -> Result<Option<ContentItem>> {
        Ok(self.contents.lock().unwrap().get(content_id).cloned())
    }

    async fn set_status(
        &self,
        content_id: &str,
        status: ContentStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut contents = self.contents.lock().unwrap();
        if let Some(item) = contents.get_mut(content_id) {
            item.status = status;
            item.status_reason = reason.map(|r| r.to_string());
        }
        Ok(())
    }
}
