//! Read access to the static graph definitions.
//!
//! Node and edge rows are owned by the graph CRUD collaborator and are
//! immutable for the duration of a run. The Graph Snapshot Loader reads
//! them once at simulation start; the engine never writes them.
//!
//! Rows are returned in definition order (`created_at`, then id) so the
//! adjacency lists the engine builds from them are stable across loads.

use sqlx::PgPool;
use uuid::Uuid;

use cascadex_types::GraphId;

use crate::error::DbError;

/// A node definition row from the `graph_nodes` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NodeRow {
    /// Node id.
    pub id: Uuid,
    /// Human-readable node name.
    pub name: String,
    /// Initial resource value for a run.
    pub resource_value: f64,
    /// Maximum resource capacity.
    pub max_capacity: f64,
    /// Failure threshold.
    pub failure_threshold: f64,
}

/// An edge definition row from the `graph_edges` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EdgeRow {
    /// Source node id.
    pub source_node_id: Uuid,
    /// Target node id.
    pub target_node_id: Uuid,
    /// Propagation force subtracted from the target on source failure.
    pub weight: f64,
}

/// A complete static graph definition: all nodes and edges of one graph.
#[derive(Debug, Clone)]
pub struct GraphDefinition {
    /// Node rows in definition order.
    pub nodes: Vec<NodeRow>,
    /// Edge rows in definition order.
    pub edges: Vec<EdgeRow>,
}

/// Read operations on the `graph_nodes` and `graph_edges` tables.
#[derive(Clone)]
pub struct GraphStore {
    pool: PgPool,
}

impl GraphStore {
    /// Create a new graph store over a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load the full definition of one graph.
    ///
    /// Returns an empty node list when the graph has no nodes; the
    /// caller decides whether that is an error (the engine treats it as
    /// `NotFound` at simulation start).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if either query fails.
    pub async fn load_graph(&self, graph_id: GraphId) -> Result<GraphDefinition, DbError> {
        let graph_uuid = graph_id.into_inner();

        let nodes = sqlx::query_as::<_, NodeRow>(
            r"SELECT id, name, resource_value, max_capacity, failure_threshold
              FROM graph_nodes
              WHERE graph_id = $1
              ORDER BY created_at, id",
        )
        .bind(graph_uuid)
        .fetch_all(&self.pool)
        .await?;

        let edges = sqlx::query_as::<_, EdgeRow>(
            r"SELECT source_node_id, target_node_id, weight
              FROM graph_edges
              WHERE graph_id = $1
              ORDER BY created_at, id",
        )
        .bind(graph_uuid)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(
            %graph_id,
            nodes = nodes.len(),
            edges = edges.len(),
            "Loaded graph definition"
        );

        Ok(GraphDefinition { nodes, edges })
    }
}
