//! Quota and posting-window admission control
//!
//! Decides whether a dispatch may proceed right now. Deferrals are ordinary
//! return values driving the job state machine, never errors. The gate owns
//! its per-platform daily counters; the worker never mutates them directly.

use chrono::{DateTime, FixedOffset, NaiveDate, Timelike, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::{Platform, UsageStats};

/// Admission decision for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Deferred {
        reason: String,
        /// Earliest timestamp at which the dispatch can become eligible.
        retry_at: i64,
    },
}

#[derive(Debug, Clone, Copy)]
struct DayCounter {
    date: NaiveDate,
    used: u32,
}

/// Stateful per-platform daily quota plus the global posting-hour window.
pub struct QuotaGate {
    window_start: u32,
    window_end: u32,
    offset: FixedOffset,
    limits: HashMap<Platform, u32>,
    counters: Mutex<HashMap<Platform, DayCounter>>,
}

impl QuotaGate {
    /// `window_start`/`window_end` are hours in the reference timezone given
    /// by `utc_offset_hours`; admission requires `start <= hour < end`.
    pub fn new(
        window_start: u32,
        window_end: u32,
        utc_offset_hours: i32,
        limits: HashMap<Platform, u32>,
    ) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        Self {
            window_start,
            window_end,
            offset,
            limits,
            counters: Mutex::new(HashMap::new()),
        }
    }

    fn local(&self, now: i64) -> DateTime<FixedOffset> {
        DateTime::from_timestamp(now, 0)
            .unwrap_or_else(Utc::now)
            .with_timezone(&self.offset)
    }

    fn timestamp_at(&self, date: NaiveDate, hour: u32, fallback: i64) -> i64 {
        date.and_hms_opt(hour, 0, 0)
            .and_then(|ndt| ndt.and_local_timezone(self.offset).single())
            .map(|dt| dt.timestamp())
            .unwrap_or(fallback)
    }

    /// Next moment the posting window opens, from the given local time.
    fn next_window_open(&self, local: DateTime<FixedOffset>, now: i64) -> i64 {
        let date = if local.hour() < self.window_start {
            local.date_naive()
        } else {
            local
                .date_naive()
                .succ_opt()
                .unwrap_or_else(|| local.date_naive())
        };
        self.timestamp_at(date, self.window_start, now + 3600)
    }

    /// Decide whether a dispatch for `platform` may proceed at `now`.
    pub fn admit(&self, platform: Platform, now: i64) -> Admission {
        let local = self.local(now);
        let hour = local.hour();

        if hour < self.window_start || hour >= self.window_end {
            return Admission::Deferred {
                reason: "outside posting window".to_string(),
                retry_at: self.next_window_open(local, now),
            };
        }

        let limit = self.limit_for(platform);
        let mut counters = self.counters.lock().unwrap();
        let counter = Self::counter_for_day(&mut counters, platform, local.date_naive());

        if counter.used >= limit {
            let next_midnight = self.timestamp_at(
                local
                    .date_naive()
                    .succ_opt()
                    .unwrap_or_else(|| local.date_naive()),
                0,
                now + 86_400,
            );
            return Admission::Deferred {
                reason: "daily quota exceeded".to_string(),
                retry_at: next_midnight,
            };
        }

        Admission::Admitted
    }

    /// Record one effective publish. Called exactly once per publish that
    /// actually reached the platform, never per retry attempt.
    pub fn record_publish(&self, platform: Platform, now: i64) {
        let local_date = self.local(now).date_naive();
        let mut counters = self.counters.lock().unwrap();
        let counter = Self::counter_for_day(&mut counters, platform, local_date);
        counter.used = counter.used.saturating_add(1);
    }

    pub fn usage(&self, platform: Platform, now: i64) -> UsageStats {
        let limit = self.limit_for(platform);
        let local_date = self.local(now).date_naive();
        let mut counters = self.counters.lock().unwrap();
        let counter = Self::counter_for_day(&mut counters, platform, local_date);
        UsageStats {
            platform,
            used: counter.used,
            limit,
            remaining: limit.saturating_sub(counter.used),
        }
    }

    fn limit_for(&self, platform: Platform) -> u32 {
        self.limits.get(&platform).copied().unwrap_or(u32::MAX)
    }

    /// Counters reset when the local wall-clock date changes; no timers.
    fn counter_for_day(
        counters: &mut HashMap<Platform, DayCounter>,
        platform: Platform,
        date: NaiveDate,
    ) -> &mut DayCounter {
        let counter = counters
            .entry(platform)
            .or_insert(DayCounter { date, used: 0 });
        if counter.date != date {
            counter.date = date;
            counter.used = 0;
        }
        counter
    }
}
