//! Error types for Postpilot

use thiserror::Error;

use crate::types::JobStatus;

pub type Result<T> = std::result::Result<T, PostPilotError>;

#[derive(Error, Debug)]
pub enum PostPilotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job {job_id} is {status}; cannot {action}")]
    InvalidTransition {
        job_id: String,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl PostPilotError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PostPilotError::InvalidInput(_)
            | PostPilotError::InvalidTransition { .. }
            | PostPilotError::NotFound(_) => 3,
            PostPilotError::Transport(TransportError::Credential(_)) => 2,
            PostPilotError::Config(_)
            | PostPilotError::Store(_)
            | PostPilotError::Transport(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Errors raised by the platform transport layer.
///
/// Cloneable so cached dispatch outcomes and retry loops can carry them.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Local rate budget exhausted. Never retried inside the transport;
    /// surfaces to the job retry policy.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Remote-side quota signal. Never retried inside the transport.
    #[error("Remote quota exceeded: {0}")]
    Quota(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// Content fails platform constraints (length cap, missing media).
    #[error("Content validation failed: {0}")]
    Validation(String),

    /// Malformed or revoked credential.
    #[error("Credential rejected: {0}")]
    Credential(String),

    /// Any other failure the remote reports as permanent.
    #[error("Permanent transport failure: {0}")]
    Permanent(String),
}

impl TransportError {
    /// Retryable within the transport's own bounded retry loop.
    pub fn retryable_inline(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Timeout(_))
    }

    /// Retryable at the job level (rescheduled with backoff).
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_)
                | TransportError::Timeout(_)
                | TransportError::RateLimited(_)
                | TransportError::Quota(_)
        )
    }
}
