//! At-most-once dispatch ledger
//!
//! Maps a deterministic dispatch key to the state of its one allowed side
//! effect. The ledger is the single source of truth for "has this already
//! happened" and must be consulted before any transport call, never after.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};
use crate::store::IdempotencyStore;
use crate::types::{DispatchOutcome, Platform};

/// Records older than this are treated as expired and logically absent.
pub const TTL_SECS: i64 = 24 * 3600;

/// Width of the run-at bucket used in key derivation. Two enqueues of the
/// same intent landing within one bucket collapse to the same key; distinct
/// scheduled times do not.
const KEY_BUCKET_SECS: i64 = 60;

/// Derive the dispatch key for a logical publish intent.
pub fn derive_key(platform: Platform, content_id: &str, run_at: i64) -> String {
    let bucket = run_at.div_euclid(KEY_BUCKET_SECS);
    let mut hasher = Sha256::new();
    hasher.update(platform.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(content_id.as_bytes());
    hasher.update(b":");
    hasher.update(bucket.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Pending,
    Completed,
    Failed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Pending => "pending",
            LedgerStatus::Completed => "completed",
            LedgerStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for LedgerStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LedgerStatus::Pending),
            "completed" => Ok(LedgerStatus::Completed),
            "failed" => Ok(LedgerStatus::Failed),
            _ => Err(format!("Unknown ledger status: '{}'", s)),
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub status: LedgerStatus,
    pub result: Option<String>,
    pub created_at: i64,
}

/// Raw outcome of a store-level reservation attempt.
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    Reserved,
    Existing(IdempotencyRecord),
}

/// What the caller should do with this dispatch key.
#[derive(Debug, Clone)]
pub enum Reservation {
    /// This caller holds the reservation and may dispatch.
    Reserved,
    /// Another dispatch for the key is in flight; do not dispatch.
    InProgress,
    /// The intent already reached a terminal state; the cached result is
    /// returned and no transport call may be made.
    Completed(DispatchOutcome),
}

/// Ledger façade over a pluggable [`IdempotencyStore`].
#[derive(Clone)]
pub struct IdempotencyLedger {
    store: Arc<dyn IdempotencyStore>,
}

impl IdempotencyLedger {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self { store }
    }

    /// Atomically claim the key or observe its current state.
    pub async fn check_or_reserve(&self, key: &str, now: i64) -> Result<Reservation> {
        match self.store.reserve(key, now, TTL_SECS).await? {
            ReserveOutcome::Reserved => Ok(Reservation::Reserved),
            ReserveOutcome::Existing(record) => match record.status {
                LedgerStatus::Pending => Ok(Reservation::InProgress),
                LedgerStatus::Completed | LedgerStatus::Failed => {
                    let outcome = match record.result.as_deref() {
                        Some(raw) => serde_json::from_str(raw).map_err(|e| {
                            StoreError::Corrupt(format!(
                                "cached result for key {} unreadable: {}",
                                key, e
                            ))
                        })?,
                        None => DispatchOutcome::failed("cached result missing".to_string(), false),
                    };
                    Ok(Reservation::Completed(outcome))
                }
            },
        }
    }

    /// Record the terminal result for a reserved key. Committing an
    /// already-committed key is a no-op.
    pub async fn commit(
        &self,
        key: &str,
        status: LedgerStatus,
        outcome: &DispatchOutcome,
    ) -> Result<()> {
        let raw = serde_json::to_string(outcome)
            .map_err(|e| StoreError::Corrupt(format!("result for key {} unserializable: {}", key, e)))?;
        self.store.commit(key, status, &raw).await
    }

    /// Drop a pending reservation so a later job-level retry under the same
    /// key can reserve again. Only pending records are removed.
    pub async fn release(&self, key: &str) -> Result<()> {
        self.store.release(key).await
    }
}
