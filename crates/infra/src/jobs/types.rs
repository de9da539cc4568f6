//! Job rows and the retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{EventId, LedgerId};

/// Queue-side lifecycle of an outbox job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Enqueued, never claimed.
    Available,
    /// Claimed by a worker; reclaimable after the lease expires.
    Running,
    /// Failed, scheduled for another attempt at `run_at`.
    Retryable,
    /// Finished successfully.
    Completed,
    /// Out of attempts or non-retryably failed.
    Discarded,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Available => "available",
            JobState::Running => "running",
            JobState::Retryable => "retryable",
            JobState::Completed => "completed",
            JobState::Discarded => "discarded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(JobState::Available),
            "running" => Some(JobState::Running),
            "retryable" => Some(JobState::Retryable),
            "completed" => Some(JobState::Completed),
            "discarded" => Some(JobState::Discarded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Discarded)
    }
}

/// A claimed or inspected outbox job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxJob {
    pub id: i64,
    pub event_id: EventId,
    pub ledger_id: LedgerId,
    pub state: JobState,
    /// Attempt number, 1-based once claimed (the claim increments it).
    pub attempt: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxJob {
    /// True when the current attempt was the last one allowed.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Work item written alongside its event.
#[derive(Debug, Clone, Copy)]
pub struct NewOutboxJob {
    pub event_id: EventId,
    pub ledger_id: LedgerId,
}

/// Retry policy: exponential backoff with a cap and deterministic jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts before a job is discarded.
    pub max_attempts: i32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied to the exponential growth.
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0) spread deterministically by attempt number.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: i32) -> Duration {
        if attempt <= 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let exp = 2_f64.powi(attempt - 1);
        let delay_ms = (base_ms * exp).min(max_ms);

        // Deterministic jitter keyed by attempt so retries of a hot job do
        // not land in lockstep with each other across workers.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }
}
