//! The run coordinator: at most one live simulation per graph.
//!
//! A run claim is a Redis key `lock:sim:{graph_id}` created with
//! SET NX EX. Whoever creates the key owns the run; everyone else gets
//! `AlreadyRunning`. The TTL bounds how long a crashed worker blocks the
//! graph -- the claim is renewed at the top of every tick, so a healthy
//! run holds it indefinitely while a dead one frees it within the TTL.
//!
//! Renewal doubles as a liveness probe: EXPIRE on a missing key returns
//! false, which the tick pipeline reads as "the claim is gone, abort".

use cascadex_db::{DbError, RedisPool};
use cascadex_types::GraphId;

/// Value stored under the claim key. The key's existence is the claim;
/// the value is only for operator inspection.
const CLAIM_VALUE: &str = "held";

/// Redis key for a graph's run claim.
#[must_use]
pub fn claim_key(graph_id: GraphId) -> String {
    format!("lock:sim:{graph_id}")
}

/// Claim operations for run exclusivity.
#[derive(Clone)]
pub struct RunClaims {
    redis: RedisPool,
    ttl_secs: i64,
}

impl RunClaims {
    /// Create a claim handle with the given TTL.
    pub const fn new(redis: RedisPool, ttl_secs: i64) -> Self {
        Self { redis, ttl_secs }
    }

    /// Try to acquire the claim for a graph.
    ///
    /// Returns `false` when another run already holds it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store operation fails.
    pub async fn acquire(&self, graph_id: GraphId) -> Result<bool, DbError> {
        let acquired = self
            .redis
            .set_nx_ex(&claim_key(graph_id), CLAIM_VALUE, self.ttl_secs)
            .await?;
        if acquired {
            tracing::debug!(%graph_id, ttl_secs = self.ttl_secs, "Acquired run claim");
        }
        Ok(acquired)
    }

    /// Renew the claim's TTL.
    ///
    /// Returns `false` when the claim no longer exists (expired or
    /// released), meaning the caller must abandon the tick.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store operation fails.
    pub async fn renew(&self, graph_id: GraphId) -> Result<bool, DbError> {
        self.redis.expire(&claim_key(graph_id), self.ttl_secs).await
    }

    /// Release the claim. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store operation fails.
    pub async fn release(&self, graph_id: GraphId) -> Result<(), DbError> {
        self.redis.delete(&claim_key(graph_id)).await?;
        tracing::debug!(%graph_id, "Released run claim");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_key_embeds_graph_id() {
        let graph_id = GraphId::new();
        assert_eq!(claim_key(graph_id), format!("lock:sim:{graph_id}"));
    }
}
