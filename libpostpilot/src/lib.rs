//! Postpilot - autonomous content-publishing scheduler
//!
//! This library decides whether and when a content item may be sent to a
//! social platform, dispatches it through a rate-limited transport with
//! retries, and guarantees at most one effective send per logical intent.

pub mod config;
pub mod error;
pub mod external;
pub mod gate;
pub mod guardrail;
pub mod idempotency;
pub mod logging;
pub mod publisher;
pub mod rate_limiter;
pub mod schedule;
pub mod store;
pub mod trace;
pub mod transport;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use error::{PostPilotError, Result};
pub use store::{MemoryStore, SqliteStore};
pub use types::{ContentItem, Job, JobStatus, Platform};
pub use worker::{Scheduler, TickReport};
