//! Job queue and worker
//!
//! The scheduler façade owns job records and drives them through the
//! publisher on each tick. Ticks are invoked on an external cadence (a
//! process-level timer, cron, or a test calling `tick_at` directly); the
//! core owns no background thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{PostPilotError, Result};
use crate::external::ContentStore;
use crate::gate::QuotaGate;
use crate::guardrail::Guardrail;
use crate::idempotency::{derive_key, IdempotencyLedger};
use crate::publisher::{DispatchResolution, Publisher, RetryPolicy};
use crate::rate_limiter::RateLimiterSet;
use crate::store::{IdempotencyStore, JobStore};
use crate::trace::{TraceEvent, TraceSink};
use crate::transport::Transport;
use crate::types::{
    Job, JobOutcome, JobStatus, JobSummary, MetricSample, Platform, UsageStats,
};

/// Job-level retry delays indexed by attempt number, capped at the last
/// entry for attempts beyond the table.
const JOB_BACKOFF_SECS: [i64; 4] = [60, 300, 900, 3600];

/// Delay before re-checking a key another dispatcher holds in flight.
const IN_PROGRESS_RECHECK_SECS: i64 = 60;

const TICK_BATCH_LIMIT: u32 = 100;

/// Backoff for the given 1-based attempt number.
pub fn job_backoff(attempt: u32) -> i64 {
    let idx = (attempt.max(1) as usize - 1).min(JOB_BACKOFF_SECS.len() - 1);
    JOB_BACKOFF_SECS[idx]
}

/// Result of one worker tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub processed: u32,
    pub errors: u32,
}

/// Receipt returned by enqueue.
#[derive(Debug, Clone)]
pub struct EnqueueReceipt {
    pub job_id: String,
    pub idempotency_key: String,
    /// True when the intent collapsed onto an existing job.
    pub deduplicated: bool,
}

/// The scheduler façade: enqueue, queue management, and the worker tick.
pub struct Scheduler {
    jobs: Arc<dyn JobStore>,
    contents: Arc<dyn ContentStore>,
    gate: Arc<QuotaGate>,
    publisher: Publisher,
    trace: Arc<dyn TraceSink>,
    max_attempts: u32,
    lookahead_secs: i64,
    running_stale_secs: i64,
    tick_active: AtomicBool,
}

impl Scheduler {
    pub fn new(
        config: &Config,
        jobs: Arc<dyn JobStore>,
        idempotency: Arc<dyn IdempotencyStore>,
        contents: Arc<dyn ContentStore>,
        transport: Arc<dyn Transport>,
        trace: Arc<dyn TraceSink>,
    ) -> Self {
        let sched = &config.scheduler;
        let gate = Arc::new(QuotaGate::new(
            sched.window_start_hour,
            sched.window_end_hour,
            sched.utc_offset_hours,
            config.daily_limits(),
        ));
        let limiters =
            RateLimiterSet::new(&config.hourly_limits(), sched.min_request_interval_ms);
        let publisher = Publisher::new(
            Guardrail::new(&config.guardrails),
            Arc::clone(&gate),
            IdempotencyLedger::new(idempotency),
            limiters,
            transport,
            Arc::clone(&contents),
            Arc::clone(&trace),
            RetryPolicy::default(),
            Duration::from_secs(sched.transport_timeout_secs),
        );

        Self {
            jobs,
            contents,
            gate,
            publisher,
            trace,
            max_attempts: sched.max_attempts,
            lookahead_secs: sched.lookahead_secs,
            running_stale_secs: sched.running_stale_secs,
            tick_active: AtomicBool::new(false),
        }
    }

    /// Override the transport-level retry policy (mainly for tests).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.publisher = self.publisher.with_retry_policy(retry);
        self
    }

    /// Schedule a dispatch intent. Idempotent: re-enqueuing the same
    /// (content, platform, run-at bucket) returns the existing job.
    pub async fn enqueue(
        &self,
        content_id: &str,
        platform: Platform,
        run_at: Option<i64>,
    ) -> Result<EnqueueReceipt> {
        self.enqueue_at(content_id, platform, run_at, Utc::now().timestamp())
            .await
    }

    pub async fn enqueue_at(
        &self,
        content_id: &str,
        platform: Platform,
        run_at: Option<i64>,
        now: i64,
    ) -> Result<EnqueueReceipt> {
        if content_id.trim().is_empty() {
            return Err(PostPilotError::InvalidInput(
                "content id cannot be empty".to_string(),
            ));
        }
        let content = self
            .contents
            .get_content(content_id)
            .await?
            .ok_or_else(|| PostPilotError::NotFound(format!("content {}", content_id)))?;
        if content.body.trim().is_empty() {
            return Err(PostPilotError::InvalidInput(
                "content body cannot be empty".to_string(),
            ));
        }

        let run_at = run_at.unwrap_or(now);
        let idempotency_key = derive_key(platform, content_id, run_at);

        if let Some(existing) = self.jobs.find_by_key(&idempotency_key).await? {
            debug!(job_id = %existing.id, "enqueue collapsed onto existing job");
            return Ok(EnqueueReceipt {
                job_id: existing.id,
                idempotency_key,
                deduplicated: true,
            });
        }

        let job = Job::new(
            content_id.to_string(),
            platform,
            run_at,
            self.max_attempts,
            idempotency_key.clone(),
            now,
        );

        if let Err(error) = self.jobs.insert(&job).await {
            // Lost an insert race on the unique key; return the winner.
            if let Some(existing) = self.jobs.find_by_key(&idempotency_key).await? {
                return Ok(EnqueueReceipt {
                    job_id: existing.id,
                    idempotency_key,
                    deduplicated: true,
                });
            }
            return Err(error);
        }

        self.trace
            .emit(content_id, TraceEvent::Queued { platform });
        info!(job_id = %job.id, platform = %platform, run_at, "job enqueued");

        Ok(EnqueueReceipt {
            job_id: job.id,
            idempotency_key,
            deduplicated: false,
        })
    }

    async fn load_job(&self, job_id: &str) -> Result<Job> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| PostPilotError::NotFound(format!("job {}", job_id)))
    }

    async fn transition_pending(
        &self,
        job_id: &str,
        action: &'static str,
        now: i64,
        apply: impl FnOnce(&mut Job),
    ) -> Result<Job> {
        let mut job = self.load_job(job_id).await?;
        if job.status != JobStatus::Pending {
            return Err(PostPilotError::InvalidTransition {
                job_id: job.id,
                status: job.status,
                action,
            });
        }
        apply(&mut job);
        job.updated_at = now;
        self.jobs.update(&job).await?;
        Ok(job)
    }

    /// Cancel a pending job. Running jobs must reach a terminal state first;
    /// an in-flight transport effect cannot be un-sent.
    pub async fn cancel(&self, job_id: &str) -> Result<Job> {
        self.cancel_at(job_id, Utc::now().timestamp()).await
    }

    pub async fn cancel_at(&self, job_id: &str, now: i64) -> Result<Job> {
        self.transition_pending(job_id, "cancel", now, |job| {
            job.status = JobStatus::Cancelled;
        })
        .await
    }

    /// Move a pending job to a new run time. The idempotency key keeps the
    /// originally scheduled intent.
    pub async fn reschedule(&self, job_id: &str, run_at: i64) -> Result<Job> {
        self.reschedule_at(job_id, run_at, Utc::now().timestamp())
            .await
    }

    pub async fn reschedule_at(&self, job_id: &str, run_at: i64, now: i64) -> Result<Job> {
        self.transition_pending(job_id, "reschedule", now, |job| {
            job.run_at = run_at;
            job.next_retry_at = None;
        })
        .await
    }

    /// Make a pending job due immediately.
    pub async fn run_now(&self, job_id: &str) -> Result<Job> {
        let now = Utc::now().timestamp();
        self.transition_pending(job_id, "run now", now, |job| {
            job.run_at = now;
            job.next_retry_at = None;
        })
        .await
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<JobSummary>> {
        let jobs = self.jobs.list(status, limit).await?;
        Ok(jobs.iter().map(JobSummary::from).collect())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.load_job(job_id).await
    }

    pub fn usage_stats(&self, platform: Platform) -> UsageStats {
        self.usage_stats_at(platform, Utc::now().timestamp())
    }

    pub fn usage_stats_at(&self, platform: Platform, now: i64) -> UsageStats {
        self.gate.usage(platform, now)
    }

    pub async fn queue_stats(&self) -> Result<std::collections::HashMap<JobStatus, u32>> {
        self.jobs.status_counts().await
    }

    pub async fn fetch_metrics(
        &self,
        platform: Platform,
        since: i64,
    ) -> Result<Vec<MetricSample>> {
        self.publisher.fetch_metrics(platform, since).await
    }

    /// Fetch metrics for every platform concurrently.
    pub async fn fetch_all_metrics(&self, since: i64) -> Result<Vec<MetricSample>> {
        let fetches = Platform::ALL
            .iter()
            .map(|&platform| self.publisher.fetch_metrics(platform, since));
        let mut samples = Vec::new();
        for result in join_all(fetches).await {
            samples.extend(result?);
        }
        Ok(samples)
    }

    /// Process due jobs once.
    ///
    /// Reentrant-safe: a tick invoked while one is in flight is a no-op
    /// reporting zero processed. Retries are driven by `run_at`, not tick
    /// frequency, so a skipped tick loses nothing.
    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now().timestamp()).await
    }

    pub async fn tick_at(&self, now: i64) -> Result<TickReport> {
        if self.tick_active.swap(true, Ordering::SeqCst) {
            debug!("tick already in flight, skipping");
            return Ok(TickReport::default());
        }
        let result = self.run_tick(now).await;
        self.tick_active.store(false, Ordering::SeqCst);
        result
    }

    async fn run_tick(&self, now: i64) -> Result<TickReport> {
        let mut report = TickReport::default();

        // Jobs left running by a crashed process go back to pending; the
        // idempotency ledger guards against double effects.
        for mut job in self
            .jobs
            .stale_running(now - self.running_stale_secs)
            .await?
        {
            warn!(job_id = %job.id, "recovering stale running job");
            job.status = JobStatus::Pending;
            job.updated_at = now;
            if let Err(error) = self.jobs.update(&job).await {
                warn!(job_id = %job.id, error = %error, "failed to recover stale job");
                report.errors += 1;
            }
        }

        let due = self
            .jobs
            .due(now + self.lookahead_secs, TICK_BATCH_LIMIT)
            .await?;

        for mut job in due {
            job.status = JobStatus::Running;
            job.updated_at = now;
            if let Err(error) = self.jobs.update(&job).await {
                warn!(job_id = %job.id, error = %error, "failed to mark job running");
                report.errors += 1;
                continue;
            }

            // A single job's failure must never prevent the rest of the
            // batch from being processed.
            match self.publisher.dispatch(&job, now).await {
                Ok(resolution) => {
                    if matches!(resolution, DispatchResolution::Failed { .. }) {
                        report.errors += 1;
                    }
                    apply_resolution(&mut job, resolution, now);
                }
                Err(error) => {
                    report.errors += 1;
                    self.absorb_dispatch_error(&mut job, error, now);
                }
            }

            if let Err(error) = self.jobs.update(&job).await {
                warn!(job_id = %job.id, error = %error, "failed to persist job after dispatch");
                report.errors += 1;
            }
            report.processed += 1;
        }

        Ok(report)
    }

    /// Infrastructure errors (store or content access) around a dispatch.
    fn absorb_dispatch_error(&self, job: &mut Job, error: PostPilotError, now: i64) {
        warn!(job_id = %job.id, error = %error, "dispatch errored");
        job.last_error = Some(error.to_string());
        match error {
            // Bad references never heal; fail the job outright.
            PostPilotError::NotFound(_) | PostPilotError::InvalidInput(_) => {
                job.status = JobStatus::Failed;
            }
            // Anything else is a blip: requeue without consuming an attempt.
            _ => {
                let delay = job_backoff(job.attempts + 1);
                job.status = JobStatus::Pending;
                job.run_at = now + delay;
                job.next_retry_at = Some(now + delay);
            }
        }
        job.updated_at = now;
    }
}

/// Advance the job state machine for one dispatch resolution.
fn apply_resolution(job: &mut Job, resolution: DispatchResolution, now: i64) {
    match resolution {
        DispatchResolution::Held { reason } => {
            job.status = JobStatus::Completed;
            job.outcome = Some(JobOutcome::Held { reason });
        }
        DispatchResolution::Deferred { reason, retry_at } => {
            // Not an attempt: the dispatch never reached the transport.
            job.status = JobStatus::Pending;
            job.run_at = retry_at.max(now + 1);
            job.next_retry_at = Some(job.run_at);
            job.last_error = Some(reason);
        }
        DispatchResolution::Duplicate { cached } => {
            job.status = JobStatus::Completed;
            job.outcome = Some(JobOutcome::Duplicate { cached });
        }
        DispatchResolution::InProgress => {
            job.status = JobStatus::Pending;
            job.run_at = now + IN_PROGRESS_RECHECK_SECS;
            job.next_retry_at = Some(job.run_at);
        }
        DispatchResolution::Published { outcome } => {
            job.attempts += 1;
            job.status = JobStatus::Completed;
            job.last_error = None;
            job.next_retry_at = None;
            job.outcome = Some(JobOutcome::Published {
                published_id: outcome.published_id.unwrap_or_default(),
            });
        }
        DispatchResolution::Failed { error, terminal } => {
            job.attempts += 1;
            job.last_error = Some(error);
            if terminal {
                job.status = JobStatus::Failed;
            } else {
                let delay = job_backoff(job.attempts);
                job.status = JobStatus::Pending;
                job.run_at = now + delay;
                job.next_retry_at = Some(job.run_at);
            }
        }
    }
    job.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DispatchOutcome;

    #[test]
    fn test_job_backoff_table() {
        assert_eq!(job_backoff(1), 60);
        assert_eq!(job_backoff(2), 300);
        assert_eq!(job_backoff(3), 900);
        assert_eq!(job_backoff(4), 3600);
        assert_eq!(job_backoff(5), 3600);
        assert_eq!(job_backoff(12), 3600);
        // Defensive: attempt 0 maps to the first entry
        assert_eq!(job_backoff(0), 60);
    }

    fn running_job(attempts: u32) -> Job {
        let mut job = Job::new(
            "content-1".to_string(),
            Platform::X,
            1000,
            5,
            "key".to_string(),
            1000,
        );
        job.status = JobStatus::Running;
        job.attempts = attempts;
        job
    }

    #[test]
    fn test_apply_held_completes_without_attempt() {
        let mut job = running_job(0);
        apply_resolution(
            &mut job,
            DispatchResolution::Held {
                reason: "banned".to_string(),
            },
            2000,
        );
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 0);
        assert!(matches!(job.outcome, Some(JobOutcome::Held { .. })));
    }

    #[test]
    fn test_apply_deferred_requeues_without_attempt() {
        let mut job = running_job(2);
        apply_resolution(
            &mut job,
            DispatchResolution::Deferred {
                reason: "outside posting window".to_string(),
                retry_at: 9000,
            },
            2000,
        );
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 2, "deferral is not an attempt");
        assert_eq!(job.run_at, 9000);
        assert_eq!(job.next_retry_at, Some(9000));
        assert_eq!(job.last_error.as_deref(), Some("outside posting window"));
    }

    #[test]
    fn test_apply_deferred_never_requeues_in_past() {
        let mut job = running_job(0);
        apply_resolution(
            &mut job,
            DispatchResolution::Deferred {
                reason: "daily quota exceeded".to_string(),
                retry_at: 100,
            },
            2000,
        );
        assert!(job.run_at > 2000);
    }

    #[test]
    fn test_apply_published_counts_attempt() {
        let mut job = running_job(3);
        apply_resolution(
            &mut job,
            DispatchResolution::Published {
                outcome: DispatchOutcome::published("post-1".to_string()),
            },
            2000,
        );
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 4);
        assert!(job.last_error.is_none());
        match job.outcome {
            Some(JobOutcome::Published { published_id }) => assert_eq!(published_id, "post-1"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_apply_retryable_failure_backs_off_by_schedule() {
        let mut job = running_job(0);
        apply_resolution(
            &mut job,
            DispatchResolution::Failed {
                error: "network".to_string(),
                terminal: false,
            },
            2000,
        );
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.run_at, 2000 + 60);

        apply_resolution(
            &mut job,
            DispatchResolution::Failed {
                error: "network".to_string(),
                terminal: false,
            },
            3000,
        );
        assert_eq!(job.attempts, 2);
        assert_eq!(job.run_at, 3000 + 300);
    }

    #[test]
    fn test_apply_terminal_failure() {
        let mut job = running_job(4);
        apply_resolution(
            &mut job,
            DispatchResolution::Failed {
                error: "credential revoked".to_string(),
                terminal: true,
            },
            2000,
        );
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 5);
        assert_eq!(job.last_error.as_deref(), Some("credential revoked"));
    }

    #[test]
    fn test_apply_duplicate_completes() {
        let mut job = running_job(0);
        apply_resolution(
            &mut job,
            DispatchResolution::Duplicate {
                cached: DispatchOutcome::published("earlier".to_string()),
            },
            2000,
        );
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 0, "short-circuit is not an attempt");
    }

    #[test]
    fn test_apply_in_progress_rechecks_later() {
        let mut job = running_job(1);
        apply_resolution(&mut job, DispatchResolution::InProgress, 2000);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.run_at, 2000 + IN_PROGRESS_RECHECK_SECS);
    }
}
