//! Append-only simulation history persistence.
//!
//! One [`HistoryRow`] is written per committed tick, off the tick's
//! critical path. Rows are immutable once written and are only ever read
//! back in ascending tick order for replay. History is best-effort
//! relative to live state: a failed insert is logged by the caller and
//! never fails the tick.

use std::collections::BTreeMap;

use sqlx::PgPool;
use uuid::Uuid;

use cascadex_types::{Analytics, GraphId, NodeId, NodeState};

use crate::error::DbError;

/// Safety cap on replay queries, matching the external API's page limit.
const HISTORY_QUERY_LIMIT: i64 = 1000;

/// A row from the `simulation_history` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryRow {
    /// Auto-incremented row id.
    pub id: i64,
    /// The graph this snapshot belongs to.
    pub graph_id: Uuid,
    /// The committed tick this snapshot captures.
    pub tick: i64,
    /// Deep copy of the per-node state at that tick, as JSON.
    pub nodes_state: serde_json::Value,
    /// Deep copy of the analytics at that tick, as JSON.
    pub analytics: serde_json::Value,
    /// Real-world timestamp of the write.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Operations on the `simulation_history` table.
#[derive(Clone)]
pub struct HistoryStore {
    pool: PgPool,
}

impl HistoryStore {
    /// Create a new history store over a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one per-tick snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    /// Returns [`DbError::Serialization`] if state serialization fails.
    pub async fn insert(
        &self,
        graph_id: GraphId,
        tick: u64,
        nodes_state: &BTreeMap<NodeId, NodeState>,
        analytics: &Analytics,
    ) -> Result<(), DbError> {
        let tick_i64 = i64::try_from(tick).unwrap_or(i64::MAX);
        let nodes_json = serde_json::to_value(nodes_state)?;
        let analytics_json = serde_json::to_value(analytics)?;

        sqlx::query(
            r"INSERT INTO simulation_history (graph_id, tick, nodes_state, analytics)
              VALUES ($1, $2, $3, $4)",
        )
        .bind(graph_id.into_inner())
        .bind(tick_i64)
        .bind(nodes_json)
        .bind(analytics_json)
        .execute(&self.pool)
        .await?;

        tracing::debug!(%graph_id, tick, "Inserted history snapshot");
        Ok(())
    }

    /// Query a graph's history in ascending tick order.
    ///
    /// Capped at 1000 rows as a safety limit for replay consumers.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn for_graph(&self, graph_id: GraphId) -> Result<Vec<HistoryRow>, DbError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r"SELECT id, graph_id, tick, nodes_state, analytics, created_at
              FROM simulation_history
              WHERE graph_id = $1
              ORDER BY tick
              LIMIT $2",
        )
        .bind(graph_id.into_inner())
        .bind(HISTORY_QUERY_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Query the latest snapshot for a graph, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn latest(&self, graph_id: GraphId) -> Result<Option<HistoryRow>, DbError> {
        let row = sqlx::query_as::<_, HistoryRow>(
            r"SELECT id, graph_id, tick, nodes_state, analytics, created_at
              FROM simulation_history
              WHERE graph_id = $1
              ORDER BY tick DESC
              LIMIT 1",
        )
        .bind(graph_id.into_inner())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Delete all history rows for a graph. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the delete fails.
    pub async fn clear(&self, graph_id: GraphId) -> Result<u64, DbError> {
        let result = sqlx::query(r"DELETE FROM simulation_history WHERE graph_id = $1")
            .bind(graph_id.into_inner())
            .execute(&self.pool)
            .await?;

        tracing::debug!(%graph_id, removed = result.rows_affected(), "Cleared history");
        Ok(result.rows_affected())
    }
}
