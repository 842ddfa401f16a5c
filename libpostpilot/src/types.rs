//! Core types for Postpilot

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Target social platform for a dispatch.
///
/// A closed set: selecting a transport by enum rather than a free-form
/// string makes unsupported-platform errors a compile-time concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    X,
    Instagram,
    LinkedIn,
    TikTok,
    Facebook,
    Telegram,
}

impl Platform {
    /// All supported platforms, for iteration in config and stats code.
    pub const ALL: [Platform; 6] = [
        Platform::X,
        Platform::Instagram,
        Platform::LinkedIn,
        Platform::TikTok,
        Platform::Facebook,
        Platform::Telegram,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::X => "x",
            Platform::Instagram => "instagram",
            Platform::LinkedIn => "linkedin",
            Platform::TikTok => "tiktok",
            Platform::Facebook => "facebook",
            Platform::Telegram => "telegram",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "x" => Ok(Platform::X),
            "instagram" => Ok(Platform::Instagram),
            "linkedin" => Ok(Platform::LinkedIn),
            "tiktok" => Ok(Platform::TikTok),
            "facebook" => Ok(Platform::Facebook),
            "telegram" => Ok(Platform::Telegram),
            _ => Err(format!(
                "Unknown platform: '{}'. Valid options: x, instagram, linkedin, tiktok, facebook, telegram",
                s
            )),
        }
    }
}

/// Lifecycle state of a scheduled dispatch job.
///
/// `Completed`, `Failed` and `Cancelled` are terminal and have no outgoing
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Unknown job status: '{}'", s)),
        }
    }
}

/// Terminal result of one transport attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub published_id: Option<String>,
    pub error: Option<String>,
    /// Whether the failure is retryable at the job level. Always false for
    /// successful outcomes.
    pub retryable: bool,
}

impl DispatchOutcome {
    pub fn published(published_id: String) -> Self {
        Self {
            success: true,
            published_id: Some(published_id),
            error: None,
            retryable: false,
        }
    }

    pub fn failed(error: String, retryable: bool) -> Self {
        Self {
            success: false,
            published_id: None,
            error: Some(error),
            retryable,
        }
    }
}

/// How a completed job ended, recorded alongside the terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Content reached the platform.
    Published { published_id: String },
    /// Guardrails blocked the content. A deliberate hold, not an error.
    Held { reason: String },
    /// The intent already reached a terminal state elsewhere; the cached
    /// ledger result was returned without a transport call.
    Duplicate { cached: DispatchOutcome },
}

/// A scheduled dispatch intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub content_id: String,
    pub platform: Platform,
    /// Eligible once `now >= run_at`.
    pub run_at: i64,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    /// Derived once at enqueue from (platform, content id, run-at bucket)
    /// and never recomputed, so job-level retries keep the original key.
    pub idempotency_key: String,
    pub outcome: Option<JobOutcome>,
    pub last_error: Option<String>,
    pub next_retry_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    pub fn new(
        content_id: String,
        platform: Platform,
        run_at: i64,
        max_attempts: u32,
        idempotency_key: String,
        now: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content_id,
            platform,
            run_at,
            attempts: 0,
            max_attempts,
            status: JobStatus::Pending,
            idempotency_key,
            outcome: None,
            last_error: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Compact job view returned by the list operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub content_id: String,
    pub platform: Platform,
    pub status: JobStatus,
    pub run_at: i64,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<i64>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            content_id: job.content_id.clone(),
            platform: job.platform,
            status: job.status,
            run_at: job.run_at,
            attempts: job.attempts,
            last_error: job.last_error.clone(),
            next_retry_at: job.next_retry_at,
        }
    }
}

/// Verdict of a guardrail evaluation. Pure value, computed per evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    pub blocked: bool,
    pub reason: Option<String>,
    pub matched_term: Option<String>,
}

impl GuardrailVerdict {
    pub fn clean() -> Self {
        Self {
            blocked: false,
            reason: None,
            matched_term: None,
        }
    }

    pub fn blocked(reason: String, matched_term: String) -> Self {
        Self {
            blocked: true,
            reason: Some(reason),
            matched_term: Some(matched_term),
        }
    }
}

/// Terminal status written back to the content store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Pending,
    Published,
    Held,
    Error,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Pending => "pending",
            ContentStatus::Published => "published",
            ContentStatus::Held => "held",
            ContentStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for ContentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ContentStatus::Pending),
            "published" => Ok(ContentStatus::Published),
            "held" => Ok(ContentStatus::Held),
            "error" => Ok(ContentStatus::Error),
            _ => Err(format!("Unknown content status: '{}'", s)),
        }
    }
}

/// A content item as read from the content store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub body: String,
    pub media_ref: Option<String>,
    pub status: ContentStatus,
    pub status_reason: Option<String>,
    pub created_at: i64,
}

impl ContentItem {
    pub fn new(title: String, body: String, media_ref: Option<String>, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            body,
            media_ref,
            status: ContentStatus::Pending,
            status_reason: None,
            created_at: now,
        }
    }
}

/// One engagement data point returned by a transport's metrics fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub platform: Platform,
    pub metric: String,
    pub value: f64,
    pub captured_at: i64,
}

/// Daily quota usage for one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStats {
    pub platform: Platform,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_round_trip() {
        for platform in Platform::ALL {
            let parsed: Platform = platform.as_str().parse().unwrap();
            assert_eq!(parsed, platform);
        }
    }

    #[test]
    fn test_platform_parse_case_insensitive() {
        assert_eq!("LinkedIn".parse::<Platform>().unwrap(), Platform::LinkedIn);
        assert_eq!("TELEGRAM".parse::<Platform>().unwrap(), Platform::Telegram);
    }

    #[test]
    fn test_platform_parse_unknown() {
        let err = "myspace".parse::<Platform>().unwrap_err();
        assert!(err.contains("myspace"));
    }

    #[test]
    fn test_platform_serde_lowercase() {
        let json = serde_json::to_string(&Platform::TikTok).unwrap();
        assert_eq!(json, r#""tiktok""#);
        let parsed: Platform = serde_json::from_str(r#""x""#).unwrap();
        assert_eq!(parsed, Platform::X);
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_job_new_defaults() {
        let job = Job::new(
            "content-1".to_string(),
            Platform::X,
            1_700_000_000,
            5,
            "key-1".to_string(),
            1_700_000_000,
        );

        assert!(Uuid::parse_str(&job.id).is_ok());
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.outcome.is_none());
        assert!(job.last_error.is_none());
    }

    #[test]
    fn test_job_unique_ids() {
        let a = Job::new("c".into(), Platform::X, 0, 5, "k1".into(), 0);
        let b = Job::new("c".into(), Platform::X, 0, 5, "k2".into(), 0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_dispatch_outcome_constructors() {
        let ok = DispatchOutcome::published("post-1".to_string());
        assert!(ok.success);
        assert_eq!(ok.published_id.as_deref(), Some("post-1"));
        assert!(!ok.retryable);

        let failed = DispatchOutcome::failed("timeout".to_string(), true);
        assert!(!failed.success);
        assert!(failed.retryable);
        assert_eq!(failed.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_job_outcome_serialization() {
        let outcome = JobOutcome::Held {
            reason: "contains banned word: 'bedava'".to_string(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("held"));
        assert!(json.contains("bedava"));

        let parsed: JobOutcome = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, JobOutcome::Held { .. }));
    }

    #[test]
    fn test_guardrail_verdict_helpers() {
        assert!(!GuardrailVerdict::clean().blocked);

        let verdict =
            GuardrailVerdict::blocked("contains banned tag: '#crypto'".into(), "#crypto".into());
        assert!(verdict.blocked);
        assert_eq!(verdict.matched_term.as_deref(), Some("#crypto"));
    }

    #[test]
    fn test_job_summary_from_job() {
        let mut job = Job::new(
            "content-9".to_string(),
            Platform::Telegram,
            42,
            5,
            "key-9".to_string(),
            42,
        );
        job.attempts = 2;
        job.last_error = Some("network".to_string());

        let summary = JobSummary::from(&job);
        assert_eq!(summary.id, job.id);
        assert_eq!(summary.platform, Platform::Telegram);
        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.last_error.as_deref(), Some("network"));
    }
}
