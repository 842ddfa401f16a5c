//! Dispatch orchestration
//!
//! Composes the guardrail engine, the quota/window gate, the idempotency
//! ledger and the platform transport into a single dispatch operation. The
//! ordering is fixed: guardrails first (blocked content never consumes
//! quota), then admission, then the ledger, and only then the transport.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{PostPilotError, Result, TransportError};
use crate::external::ContentStore;
use crate::gate::{Admission, QuotaGate};
use crate::guardrail::Guardrail;
use crate::idempotency::{IdempotencyLedger, LedgerStatus, Reservation};
use crate::rate_limiter::{RateLimiter, RateLimiterSet};
use crate::trace::{TraceEvent, TraceSink};
use crate::transport::{PublishItem, PublishReceipt, Transport};
use crate::types::{ContentStatus, DispatchOutcome, Job};

/// Transport-level retry policy, distinct from job-level rescheduling.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per dispatch: the first try plus the retries.
    pub max_attempts: u32,
    pub base: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
        }
    }
}

/// How one dispatch attempt resolved, driving the job state machine.
#[derive(Debug, Clone)]
pub enum DispatchResolution {
    /// Guardrails blocked the content. Terminal, not an error.
    Held { reason: String },
    /// Window or quota refused admission; retry no earlier than `retry_at`.
    /// Not counted as an attempt.
    Deferred { reason: String, retry_at: i64 },
    /// The ledger already holds a terminal result for this key.
    Duplicate { cached: DispatchOutcome },
    /// Another dispatch for this key is in flight elsewhere.
    InProgress,
    Published { outcome: DispatchOutcome },
    /// Transport failure. `terminal` folds in both permanence and the
    /// attempt ceiling.
    Failed { error: String, terminal: bool },
}

/// Publish one item through the rate limiter with bounded retries.
///
/// The rate limiter is consulted before every attempt; an exhausted budget
/// propagates immediately and is never retried here. Only network and
/// timeout failures are retried inline, with `base * 2^n` backoff plus
/// jitter.
pub async fn publish_with_retry(
    transport: &dyn Transport,
    limiter: &RateLimiter,
    item: &PublishItem,
    policy: &RetryPolicy,
    timeout: Duration,
) -> std::result::Result<PublishReceipt, TransportError> {
    let mut attempt = 0u32;
    loop {
        limiter.acquire().await?;

        let result = match tokio::time::timeout(timeout, transport.publish(item)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(format!(
                "publish to {} exceeded {}s",
                item.platform,
                timeout.as_secs()
            ))),
        };

        match result {
            Ok(receipt) => {
                if attempt > 0 {
                    info!(
                        platform = %item.platform,
                        attempt = attempt + 1,
                        "publish succeeded after retry"
                    );
                }
                return Ok(receipt);
            }
            Err(error) => {
                attempt += 1;
                if !error.retryable_inline() || attempt >= policy.max_attempts {
                    return Err(error);
                }
                let backoff = policy.base * 2u32.saturating_pow(attempt - 1);
                let jitter = if policy.max_jitter.is_zero() {
                    Duration::ZERO
                } else {
                    Duration::from_millis(
                        rand::thread_rng().gen_range(0..=policy.max_jitter.as_millis() as u64),
                    )
                };
                warn!(
                    platform = %item.platform,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %error,
                    "transient publish error, retrying in {:?}",
                    backoff + jitter
                );
                sleep(backoff + jitter).await;
            }
        }
    }
}

/// Orchestrates one dispatch through guardrail, gate, ledger and transport.
pub struct Publisher {
    guardrail: Guardrail,
    gate: Arc<QuotaGate>,
    ledger: IdempotencyLedger,
    limiters: RateLimiterSet,
    transport: Arc<dyn Transport>,
    contents: Arc<dyn ContentStore>,
    trace: Arc<dyn TraceSink>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Publisher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guardrail: Guardrail,
        gate: Arc<QuotaGate>,
        ledger: IdempotencyLedger,
        limiters: RateLimiterSet,
        transport: Arc<dyn Transport>,
        contents: Arc<dyn ContentStore>,
        trace: Arc<dyn TraceSink>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            guardrail,
            gate,
            ledger,
            limiters,
            transport,
            contents,
            trace,
            retry,
            timeout,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one job through the full pipeline.
    ///
    /// `job` is not mutated here; the resolution tells the worker how to
    /// advance the state machine. Attempt accounting for terminality uses
    /// `job.attempts + 1`, the attempt this dispatch represents.
    pub async fn dispatch(&self, job: &Job, now: i64) -> Result<DispatchResolution> {
        let content = self
            .contents
            .get_content(&job.content_id)
            .await?
            .ok_or_else(|| PostPilotError::NotFound(format!("content {}", job.content_id)))?;

        let verdict = self.guardrail.evaluate(&content.title, &content.body);
        if verdict.blocked {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "blocked by guardrails".to_string());
            self.contents
                .set_status(&job.content_id, ContentStatus::Held, Some(&reason))
                .await?;
            self.trace.emit(
                &job.content_id,
                TraceEvent::Held {
                    reason: reason.clone(),
                },
            );
            info!(job_id = %job.id, reason = %reason, "content held by guardrails");
            return Ok(DispatchResolution::Held { reason });
        }

        if let Admission::Deferred { reason, retry_at } = self.gate.admit(job.platform, now) {
            return Ok(DispatchResolution::Deferred { reason, retry_at });
        }

        match self
            .ledger
            .check_or_reserve(&job.idempotency_key, now)
            .await?
        {
            Reservation::Completed(cached) => {
                info!(
                    job_id = %job.id,
                    key = %job.idempotency_key,
                    "duplicate intent, returning cached result"
                );
                return Ok(DispatchResolution::Duplicate { cached });
            }
            Reservation::InProgress => return Ok(DispatchResolution::InProgress),
            Reservation::Reserved => {}
        }

        self.trace.emit(
            &job.content_id,
            TraceEvent::Publishing {
                platform: job.platform,
            },
        );

        let item = PublishItem {
            content_id: job.content_id.clone(),
            platform: job.platform,
            title: content.title.clone(),
            body: content.body.clone(),
            media_ref: content.media_ref.clone(),
        };

        let limiter = self.limiters.limiter(job.platform);
        match publish_with_retry(
            self.transport.as_ref(),
            limiter,
            &item,
            &self.retry,
            self.timeout,
        )
        .await
        {
            Ok(receipt) => {
                let outcome = DispatchOutcome::published(receipt.published_id.clone());
                self.ledger
                    .commit(&job.idempotency_key, LedgerStatus::Completed, &outcome)
                    .await?;
                // Quota counts effective publishes, never retry attempts.
                self.gate.record_publish(job.platform, now);
                self.contents
                    .set_status(&job.content_id, ContentStatus::Published, None)
                    .await?;
                self.trace.emit(
                    &job.content_id,
                    TraceEvent::Published {
                        platform: job.platform,
                        published_id: receipt.published_id,
                    },
                );
                Ok(DispatchResolution::Published { outcome })
            }
            Err(error) => {
                let attempts_after = job.attempts + 1;
                let terminal = !error.retryable() || attempts_after >= job.max_attempts;
                let message = error.to_string();
                warn!(
                    job_id = %job.id,
                    platform = %job.platform,
                    terminal,
                    error = %message,
                    "dispatch failed"
                );

                if terminal {
                    let outcome = DispatchOutcome::failed(message.clone(), false);
                    self.ledger
                        .commit(&job.idempotency_key, LedgerStatus::Failed, &outcome)
                        .await?;
                    self.contents
                        .set_status(&job.content_id, ContentStatus::Error, Some(&message))
                        .await?;
                    self.trace.emit(
                        &job.content_id,
                        TraceEvent::Failed {
                            error: message.clone(),
                        },
                    );
                } else {
                    // Drop the reservation so the job-level retry can
                    // reserve the same key again.
                    self.ledger.release(&job.idempotency_key).await?;
                }

                Ok(DispatchResolution::Failed {
                    error: message,
                    terminal,
                })
            }
        }
    }

    /// Fetch engagement metrics through the underlying transport.
    pub async fn fetch_metrics(
        &self,
        platform: crate::types::Platform,
        since: i64,
    ) -> Result<Vec<crate::types::MetricSample>> {
        Ok(self.transport.fetch_metrics(platform, since).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GuardrailConfig, RiskLevel};
    use crate::idempotency::derive_key;
    use crate::store::{IdempotencyStore, MemoryStore};
    use crate::trace::MemorySink;
    use crate::transport::MockTransport;
    use crate::types::{ContentItem, Platform};
    use async_trait::async_trait;
    use std::collections::HashMap;

    const NOW: i64 = 1_748_865_600; // 2025-06-02 12:00:00 UTC

    struct Fixture {
        store: Arc<MemoryStore>,
        transport: Arc<MockTransport>,
        sink: Arc<MemorySink>,
        gate: Arc<QuotaGate>,
        publisher: Publisher,
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base: Duration::from_millis(1),
            max_jitter: Duration::ZERO,
        }
    }

    fn fixture_with(transport: MockTransport, daily_limit: u32) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(transport);
        let sink = Arc::new(MemorySink::new());

        let mut limits = HashMap::new();
        for platform in Platform::ALL {
            limits.insert(platform, daily_limit);
        }
        let gate = Arc::new(QuotaGate::new(8, 22, 0, limits));

        let guardrail = Guardrail::new(&GuardrailConfig {
            banned_words: vec!["bedava".to_string()],
            banned_tags: vec!["#crypto".to_string()],
            risk_level: RiskLevel::Normal,
        });

        let publisher = Publisher::new(
            guardrail,
            Arc::clone(&gate),
            IdempotencyLedger::new(store.clone() as Arc<dyn IdempotencyStore>),
            RateLimiterSet::new(&HashMap::new(), 0),
            transport.clone() as Arc<dyn Transport>,
            store.clone() as Arc<dyn ContentStore>,
            sink.clone() as Arc<dyn TraceSink>,
            fast_retry(),
            Duration::from_secs(5),
        );

        Fixture {
            store,
            transport,
            sink,
            gate,
            publisher,
        }
    }

    fn fixture(transport: MockTransport) -> Fixture {
        fixture_with(transport, 100)
    }

    fn seed_job(fixture: &Fixture, title: &str, body: &str) -> Job {
        let mut item = ContentItem::new(title.to_string(), body.to_string(), None, NOW);
        item.id = format!("content-{}", title.to_lowercase().replace(' ', "-"));
        let content_id = item.id.clone();
        fixture.store.add_content(item);
        let key = derive_key(Platform::X, &content_id, NOW);
        Job::new(content_id, Platform::X, NOW, 5, key, NOW)
    }

    #[tokio::test]
    async fn test_successful_dispatch() {
        let fx = fixture(MockTransport::succeeding());
        let job = seed_job(&fx, "Hello", "safe text");

        let resolution = fx.publisher.dispatch(&job, NOW).await.unwrap();
        match resolution {
            DispatchResolution::Published { outcome } => {
                assert!(outcome.success);
                assert!(outcome.published_id.is_some());
            }
            other => panic!("expected published, got {:?}", other),
        }

        // Quota incremented exactly once, content marked published.
        assert_eq!(fx.gate.usage(Platform::X, NOW).used, 1);
        let content = fx
            .store
            .get_content(&job.content_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(content.status, ContentStatus::Published);

        let events = fx.sink.events_for(&job.content_id);
        assert!(matches!(events[0], TraceEvent::Publishing { .. }));
        assert!(matches!(events[1], TraceEvent::Published { .. }));
    }

    #[tokio::test]
    async fn test_blocked_content_is_held() {
        let fx = fixture(MockTransport::succeeding());
        let job = seed_job(&fx, "Promo", "Bedava kazanç!");

        let resolution = fx.publisher.dispatch(&job, NOW).await.unwrap();
        match resolution {
            DispatchResolution::Held { reason } => assert!(reason.contains("bedava")),
            other => panic!("expected held, got {:?}", other),
        }

        // No transport call, no quota use, content marked held.
        assert_eq!(fx.transport.publish_calls(), 0);
        assert_eq!(fx.gate.usage(Platform::X, NOW).used, 0);
        let content = fx
            .store
            .get_content(&job.content_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(content.status, ContentStatus::Held);
        assert!(content.status_reason.unwrap().contains("bedava"));
    }

    #[tokio::test]
    async fn test_outside_window_deferred() {
        let fx = fixture(MockTransport::succeeding());
        let job = seed_job(&fx, "Late", "safe text");

        // 23:00 UTC is outside the 8-22 window
        let late = NOW + 11 * 3600;
        let resolution = fx.publisher.dispatch(&job, late).await.unwrap();
        match resolution {
            DispatchResolution::Deferred { reason, retry_at } => {
                assert_eq!(reason, "outside posting window");
                assert!(retry_at > late);
            }
            other => panic!("expected deferred, got {:?}", other),
        }
        assert_eq!(fx.transport.publish_calls(), 0);
    }

    #[tokio::test]
    async fn test_quota_exhausted_deferred() {
        let fx = fixture_with(MockTransport::succeeding(), 1);
        let job = seed_job(&fx, "Second", "safe text");
        fx.gate.record_publish(Platform::X, NOW);

        let resolution = fx.publisher.dispatch(&job, NOW).await.unwrap();
        match resolution {
            DispatchResolution::Deferred { reason, .. } => {
                assert_eq!(reason, "daily quota exceeded")
            }
            other => panic!("expected deferred, got {:?}", other),
        }
        assert_eq!(fx.transport.publish_calls(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_returns_cached_without_transport_call() {
        let fx = fixture(MockTransport::succeeding());
        let job = seed_job(&fx, "Dup", "safe text");

        let first = fx.publisher.dispatch(&job, NOW).await.unwrap();
        assert!(matches!(first, DispatchResolution::Published { .. }));
        assert_eq!(fx.transport.publish_calls(), 1);

        let second = fx.publisher.dispatch(&job, NOW).await.unwrap();
        match second {
            DispatchResolution::Duplicate { cached } => {
                assert!(cached.success);
            }
            other => panic!("expected duplicate, got {:?}", other),
        }
        assert_eq!(fx.transport.publish_calls(), 1, "no second transport call");
        assert_eq!(fx.gate.usage(Platform::X, NOW).used, 1);
    }

    #[tokio::test]
    async fn test_pending_reservation_reports_in_progress() {
        let fx = fixture(MockTransport::succeeding());
        let job = seed_job(&fx, "Racing", "safe text");

        // Another dispatcher holds the reservation.
        fx.store
            .reserve(&job.idempotency_key, NOW, 3600)
            .await
            .unwrap();

        let resolution = fx.publisher.dispatch(&job, NOW).await.unwrap();
        assert!(matches!(resolution, DispatchResolution::InProgress));
        assert_eq!(fx.transport.publish_calls(), 0);
    }

    #[tokio::test]
    async fn test_inline_retries_recover_from_transient_errors() {
        let fx = fixture(MockTransport::with_script(vec![
            Err(TransportError::Network("refused".to_string())),
            Err(TransportError::Network("refused".to_string())),
        ]));
        let job = seed_job(&fx, "Flaky", "safe text");

        let resolution = fx.publisher.dispatch(&job, NOW).await.unwrap();
        assert!(matches!(resolution, DispatchResolution::Published { .. }));
        assert_eq!(fx.transport.publish_calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_releases_reservation() {
        // Remote quota errors are not retried inline.
        let fx = fixture(MockTransport::failing(
            TransportError::Quota("remote".to_string()),
            10,
        ));
        let job = seed_job(&fx, "Retry later", "safe text");

        let resolution = fx.publisher.dispatch(&job, NOW).await.unwrap();
        match resolution {
            DispatchResolution::Failed { terminal, .. } => assert!(!terminal),
            other => panic!("expected failed, got {:?}", other),
        }
        assert_eq!(fx.transport.publish_calls(), 1);
        // Reservation released so the retry can reserve again.
        assert!(fx
            .store
            .get(&job.idempotency_key)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_terminal_with_attempts_remaining() {
        let fx = fixture(MockTransport::failing(
            TransportError::Credential("revoked".to_string()),
            1,
        ));
        let job = seed_job(&fx, "Revoked", "safe text");
        assert_eq!(job.attempts, 0);

        let resolution = fx.publisher.dispatch(&job, NOW).await.unwrap();
        match resolution {
            DispatchResolution::Failed { terminal, error } => {
                assert!(terminal);
                assert!(error.contains("revoked"));
            }
            other => panic!("expected failed, got {:?}", other),
        }
        assert_eq!(fx.transport.publish_calls(), 1, "permanent errors never retry");

        let record = fx.store.get(&job.idempotency_key).await.unwrap().unwrap();
        assert_eq!(record.status, crate::idempotency::LedgerStatus::Failed);

        let content = fx
            .store
            .get_content(&job.content_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(content.status, ContentStatus::Error);
    }

    #[tokio::test]
    async fn test_last_attempt_failure_is_terminal() {
        let fx = fixture(MockTransport::failing(
            TransportError::Quota("remote".to_string()),
            10,
        ));
        let mut job = seed_job(&fx, "Exhausted", "safe text");
        job.attempts = job.max_attempts - 1;

        let resolution = fx.publisher.dispatch(&job, NOW).await.unwrap();
        match resolution {
            DispatchResolution::Failed { terminal, .. } => assert!(terminal),
            other => panic!("expected failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limited_budget_blocks_before_any_network_effect() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::succeeding());
        let sink = Arc::new(MemorySink::new());
        let gate = Arc::new(QuotaGate::new(8, 22, 0, HashMap::new()));

        let mut hourly = HashMap::new();
        hourly.insert(Platform::X, 0u32);

        let publisher = Publisher::new(
            Guardrail::new(&GuardrailConfig::default()),
            Arc::clone(&gate),
            IdempotencyLedger::new(store.clone() as Arc<dyn IdempotencyStore>),
            RateLimiterSet::new(&hourly, 0),
            transport.clone() as Arc<dyn Transport>,
            store.clone() as Arc<dyn ContentStore>,
            sink as Arc<dyn TraceSink>,
            fast_retry(),
            Duration::from_secs(5),
        );

        let mut item = ContentItem::new("t".to_string(), "clean".to_string(), None, NOW);
        item.id = "content-rl".to_string();
        store.add_content(item);
        let key = derive_key(Platform::X, "content-rl", NOW);
        let job = Job::new("content-rl".to_string(), Platform::X, NOW, 5, key, NOW);

        let resolution = publisher.dispatch(&job, NOW).await.unwrap();
        match resolution {
            DispatchResolution::Failed { terminal, error } => {
                assert!(!terminal, "rate limit surfaces as job-level retryable");
                assert!(error.contains("Rate limit"));
            }
            other => panic!("expected failed, got {:?}", other),
        }
        assert_eq!(transport.publish_calls(), 0);
    }

    #[tokio::test]
    async fn test_timeout_treated_as_transient() {
        struct SlowTransport;

        #[async_trait]
        impl Transport for SlowTransport {
            async fn publish(
                &self,
                item: &PublishItem,
            ) -> std::result::Result<PublishReceipt, TransportError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(PublishReceipt {
                    platform: item.platform,
                    published_id: "never".to_string(),
                })
            }

            async fn fetch_metrics(
                &self,
                _platform: Platform,
                _since: i64,
            ) -> std::result::Result<Vec<crate::types::MetricSample>, TransportError> {
                Ok(Vec::new())
            }

            fn name(&self) -> &str {
                "slow"
            }
        }

        let limiter = RateLimiter::new(u32::MAX, 0);
        let item = PublishItem {
            content_id: "c".to_string(),
            platform: Platform::X,
            title: "t".to_string(),
            body: "b".to_string(),
            media_ref: None,
        };
        let policy = RetryPolicy {
            max_attempts: 2,
            base: Duration::from_millis(1),
            max_jitter: Duration::ZERO,
        };

        let err = publish_with_retry(
            &SlowTransport,
            &limiter,
            &item,
            &policy,
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }
}
