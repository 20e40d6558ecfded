//! The tick scheduler: a durable, deduplicating delay queue.
//!
//! Pending tick jobs live in one Redis sorted set, `queue:ticks`, with
//! the graph id as the member and the ready-at time (epoch millis) as
//! the score. Using the graph id itself as the member makes the queue's
//! central invariant structural: a sorted set holds each member once, so
//! at most one tick job per graph can ever be pending, no matter how
//! many workers or recovery sweeps try to enqueue.
//!
//! [`TickQueue::poll`] claims one due job atomically (range-read and
//! remove in a single Lua script), so concurrent pollers never receive
//! the same job. Failed jobs are retried with exponential backoff and a
//! small random jitter, up to a bounded attempt count tracked in the
//! `queue:tick_attempts` hash.

use std::time::Duration;

use cascadex_db::{DbError, RedisPool};
use cascadex_types::GraphId;
use rand::Rng as _;

/// Sorted set holding pending tick jobs.
const QUEUE_KEY: &str = "queue:ticks";

/// Hash holding per-graph failed-attempt counters.
const ATTEMPTS_KEY: &str = "queue:tick_attempts";

/// What to do with a tick job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Re-enqueue after the given backoff delay.
    Retry {
        /// The attempt number that just failed (1-based).
        attempt: u32,
        /// Backoff delay before the job becomes due again.
        delay: Duration,
    },
    /// The attempt budget is exhausted; drop the job.
    GiveUp {
        /// Total attempts made.
        attempts: u32,
    },
}

/// Scheduler operations over the shared tick queue.
#[derive(Clone)]
pub struct TickQueue {
    redis: RedisPool,
    max_attempts: u32,
    base_delay_ms: u64,
    jitter_ms: u64,
}

impl TickQueue {
    /// Create a queue handle with the given retry policy.
    pub const fn new(
        redis: RedisPool,
        max_attempts: u32,
        base_delay_ms: u64,
        jitter_ms: u64,
    ) -> Self {
        Self {
            redis,
            max_attempts,
            base_delay_ms,
            jitter_ms,
        }
    }

    /// Enqueue a tick job for a graph, due after `delay`.
    ///
    /// Returns `false` when a job for this graph is already pending (the
    /// call is a no-op, including the score).
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store operation fails.
    pub async fn enqueue(&self, graph_id: GraphId, delay: Duration) -> Result<bool, DbError> {
        let ready_at = now_millis().saturating_add(millis_i64(delay));
        // Scores are epoch millis, well within f64's exact-integer range.
        #[allow(clippy::cast_precision_loss)]
        let score = ready_at as f64;
        self.redis
            .zadd_if_absent(QUEUE_KEY, &graph_id.to_string(), score)
            .await
    }

    /// Remove a graph's pending job, if any. Returns `true` if one was
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store operation fails.
    pub async fn remove(&self, graph_id: GraphId) -> Result<bool, DbError> {
        self.redis.zrem(QUEUE_KEY, &graph_id.to_string()).await
    }

    /// Claim one due job, removing it from the queue atomically.
    ///
    /// Returns `None` when no job is due. A member that does not parse
    /// as a graph id is dropped with a warning -- it can only appear
    /// through outside interference with the queue key.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store operation fails.
    pub async fn poll(&self) -> Result<Option<GraphId>, DbError> {
        #[allow(clippy::cast_precision_loss)]
        let cutoff = now_millis() as f64;
        let Some(member) = self.redis.zpop_due(QUEUE_KEY, cutoff).await? else {
            return Ok(None);
        };
        match member.parse::<GraphId>() {
            Ok(graph_id) => Ok(Some(graph_id)),
            Err(_) => {
                tracing::warn!(member, "Dropping unparseable tick-queue member");
                Ok(None)
            }
        }
    }

    /// Record a failed attempt for a graph's tick job and decide its
    /// fate. On `GiveUp` the attempt counter is cleared so a future run
    /// of the same graph starts fresh.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store operation fails.
    pub async fn record_failure(
        &self,
        graph_id: GraphId,
    ) -> Result<FailureDisposition, DbError> {
        let field = graph_id.to_string();
        let count = self.redis.hash_incr(ATTEMPTS_KEY, &field).await?;
        let attempt = u32::try_from(count).unwrap_or(u32::MAX);

        if attempt >= self.max_attempts {
            self.redis.hash_clear(ATTEMPTS_KEY, &field).await?;
            return Ok(FailureDisposition::GiveUp { attempts: attempt });
        }
        Ok(FailureDisposition::Retry {
            attempt,
            delay: backoff_delay(self.base_delay_ms, attempt, self.jitter_ms),
        })
    }

    /// Clear a graph's attempt counter after a successful tick.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store operation fails.
    pub async fn clear_attempts(&self, graph_id: GraphId) -> Result<(), DbError> {
        self.redis
            .hash_clear(ATTEMPTS_KEY, &graph_id.to_string())
            .await
    }
}

/// Exponential backoff with jitter: `base * 2^(attempt-1)` plus a random
/// 0..=`jitter_ms` spread so retrying workers do not stampede.
fn backoff_delay(base_delay_ms: u64, attempt: u32, jitter_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let backoff = base_delay_ms.saturating_mul(1_u64 << exponent);
    let jitter = rand::rng().random_range(0..=jitter_ms);
    Duration::from_millis(backoff.saturating_add(jitter))
}

/// Current wall-clock time as epoch milliseconds.
fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A `Duration` as whole milliseconds, saturating at `i64::MAX`.
fn millis_i64(delay: Duration) -> i64 {
    i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        for (attempt, expected_base) in [(1_u32, 1_000_u64), (2, 2_000), (3, 4_000)] {
            let delay = backoff_delay(1_000, attempt, 250);
            let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            assert!(
                millis >= expected_base,
                "attempt {attempt}: {millis}ms below base {expected_base}ms"
            );
            assert!(
                millis <= expected_base.saturating_add(250),
                "attempt {attempt}: {millis}ms beyond jitter window"
            );
        }
    }

    #[test]
    fn backoff_with_zero_jitter_is_exact() {
        assert_eq!(backoff_delay(500, 1, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 2, 0), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(500, 3, 0), Duration::from_millis(2_000));
    }

    #[test]
    fn backoff_exponent_is_capped() {
        // Absurd attempt counts must not overflow the shift
        let delay = backoff_delay(1_000, 200, 0);
        assert_eq!(delay, Duration::from_millis(65_536_000));
    }
}
