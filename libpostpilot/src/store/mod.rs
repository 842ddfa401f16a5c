//! Pluggable persistence for jobs and the idempotency ledger
//!
//! The core logic never assumes in-process memory durability: everything it
//! needs from storage goes through these traits. [`MemoryStore`] backs tests
//! and embedded use; [`SqliteStore`] is the persistent implementation.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::idempotency::{IdempotencyRecord, LedgerStatus, ReserveOutcome};
use crate::types::{Job, JobStatus};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage for scheduled dispatch jobs.
///
/// The job queue exclusively owns job records; no other component writes
/// them.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<()>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// Look up a job by its idempotency key, used to collapse duplicate
    /// enqueues of the same logical intent.
    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<Job>>;

    async fn update(&self, job: &Job) -> Result<()>;

    /// Pending jobs with `run_at <= cutoff`, ordered by `run_at`.
    async fn due(&self, cutoff: i64, limit: u32) -> Result<Vec<Job>>;

    async fn list(&self, status: Option<JobStatus>, limit: u32) -> Result<Vec<Job>>;

    /// Running jobs not touched since `older_than` — orphans from a crashed
    /// process, eligible for recovery.
    async fn stale_running(&self, older_than: i64) -> Result<Vec<Job>>;

    async fn status_counts(&self) -> Result<HashMap<JobStatus, u32>>;
}

/// Storage for the at-most-once dispatch ledger.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically create a pending record for `key`, or report the existing
    /// one. Records older than `ttl_secs` are lazily deleted and treated as
    /// absent. Concurrent callers for the same key must see exactly one
    /// `Reserved`.
    async fn reserve(&self, key: &str, now: i64, ttl_secs: i64) -> Result<ReserveOutcome>;

    /// Transition `pending -> completed|failed` and store the result.
    /// No-op if the record is already terminal.
    async fn commit(&self, key: &str, status: LedgerStatus, result: &str) -> Result<()>;

    /// Remove a pending reservation. Terminal records are left untouched.
    async fn release(&self, key: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;
}
