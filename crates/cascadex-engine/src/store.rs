//! Simulation record storage and the optimistic state committer.
//!
//! The live record for a graph is one JSON value at `sim:{graph_id}`.
//! Writes go through exactly two paths: the initial write at simulation
//! start, and [`RecordStore::commit`], which advances the record by one
//! tick only if nobody else has advanced it first. The commit check and
//! the write are a single atomic compare-and-swap on the record's
//! `version` field, so of N workers racing on the same tick exactly one
//! commits and the rest observe a conflict and walk away.

use cascadex_db::{CasOutcome, DbError, GraphDefinition, RedisPool};
use cascadex_types::{Analytics, GraphId, NodeId, NodeState, OutEdge, SimulationRecord};

/// Bound on read-evaluate-CAS cycles inside one commit call. A conflict
/// that persists this long means another worker owns the tick.
const MAX_CAS_ATTEMPTS: u32 = 3;

/// Redis key for a graph's live simulation record.
#[must_use]
pub fn record_key(graph_id: GraphId) -> String {
    format!("sim:{graph_id}")
}

/// Outcome of an optimistic commit attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// This worker won the race; the committed record is returned.
    Committed(Box<SimulationRecord>),
    /// Another worker committed this tick first. Nothing was written.
    VersionConflict,
    /// The record is gone or no longer running; the simulation stopped
    /// mid-tick. Nothing was written.
    Stopped,
}

/// Read/write access to live simulation records.
#[derive(Clone)]
pub struct RecordStore {
    redis: RedisPool,
}

impl RecordStore {
    /// Create a record store over a Redis pool.
    pub const fn new(redis: RedisPool) -> Self {
        Self { redis }
    }

    /// Load a graph's live record. `None` means no simulation is active.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the read or deserialization fails.
    pub async fn load(&self, graph_id: GraphId) -> Result<Option<SimulationRecord>, DbError> {
        self.redis.get_json(&record_key(graph_id)).await
    }

    /// Write a record unconditionally. Only valid at simulation start,
    /// before any concurrent worker can hold a reference to the run.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or the write fails.
    pub async fn write(&self, record: &SimulationRecord) -> Result<(), DbError> {
        self.redis.set_json(&record_key(record.graph_id), record).await
    }

    /// Delete a graph's record. Returns `true` if one existed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the delete fails.
    pub async fn delete(&self, graph_id: GraphId) -> Result<bool, DbError> {
        self.redis.delete(&record_key(graph_id)).await
    }

    /// Enumerate the graphs with a live, running record.
    ///
    /// SCANs `sim:*`, so it is safe against a shared instance. Records
    /// that vanish between the scan and the read are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the scan or a read fails.
    pub async fn running_graph_ids(&self) -> Result<Vec<GraphId>, DbError> {
        let keys = self.redis.scan_keys("sim:*").await?;
        let mut graph_ids = Vec::new();
        for key in keys {
            let Some(record) = self.redis.get_json::<SimulationRecord>(&key).await? else {
                continue;
            };
            if record.is_running {
                graph_ids.push(record.graph_id);
            }
        }
        Ok(graph_ids)
    }

    /// Commit an evaluated record against the version it was read at.
    ///
    /// Bumps `tick_count` and `version` by one and writes the result if
    /// and only if the stored version still equals `expected_version`.
    /// A conflict is a silent no-op: the evaluation is discarded, never
    /// re-applied, because the winning worker's evaluation of the same
    /// input state is identical.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or a store operation fails.
    pub async fn commit(
        &self,
        mut evaluated: SimulationRecord,
        expected_version: u64,
    ) -> Result<CommitOutcome, DbError> {
        let graph_id = evaluated.graph_id;
        let key = record_key(graph_id);

        evaluated.tick_count = evaluated.tick_count.saturating_add(1);
        evaluated.version = expected_version.saturating_add(1);
        let payload = serde_json::to_string(&evaluated)?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            match self
                .redis
                .compare_and_swap_version(&key, expected_version, &payload)
                .await?
            {
                CasOutcome::Swapped => {
                    return Ok(CommitOutcome::Committed(Box::new(evaluated)));
                }
                CasOutcome::Missing => return Ok(CommitOutcome::Stopped),
                CasOutcome::VersionMismatch => {
                    // Distinguish a lost race from a stop that replaced
                    // the record; re-read and decide.
                    let Some(current) = self.load(graph_id).await? else {
                        return Ok(CommitOutcome::Stopped);
                    };
                    if !current.is_running {
                        return Ok(CommitOutcome::Stopped);
                    }
                    if current.version != expected_version {
                        return Ok(CommitOutcome::VersionConflict);
                    }
                    // Version still matches on re-read; the script saw a
                    // transient state. Try again, bounded.
                }
            }
        }
        Ok(CommitOutcome::VersionConflict)
    }
}

/// Build the initial record for a freshly started simulation.
///
/// All nodes start live with their defined resource values; every node
/// gets an adjacency entry (empty when it has no outgoing edges). Edges
/// referencing unknown nodes are skipped -- graph integrity is the CRUD
/// collaborator's contract, and a dangling edge must not poison the run.
#[must_use]
pub fn build_initial_record(graph_id: GraphId, definition: &GraphDefinition) -> SimulationRecord {
    let nodes_state: std::collections::BTreeMap<NodeId, NodeState> = definition
        .nodes
        .iter()
        .map(|row| {
            (
                NodeId::from(row.id),
                NodeState {
                    name: row.name.clone(),
                    resource_value: row.resource_value,
                    max_capacity: row.max_capacity,
                    failure_threshold: row.failure_threshold,
                    failed: false,
                },
            )
        })
        .collect();

    let mut adjacency: std::collections::BTreeMap<NodeId, Vec<OutEdge>> =
        nodes_state.keys().map(|id| (*id, Vec::new())).collect();

    for edge in &definition.edges {
        let source = NodeId::from(edge.source_node_id);
        let target = NodeId::from(edge.target_node_id);
        if !nodes_state.contains_key(&target) {
            continue;
        }
        if let Some(edges) = adjacency.get_mut(&source) {
            edges.push(OutEdge {
                target,
                weight: edge.weight,
            });
        }
    }

    SimulationRecord {
        graph_id,
        nodes_state,
        adjacency,
        tick_count: 0,
        version: 0,
        is_running: true,
        analytics: Analytics::default(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use cascadex_db::{EdgeRow, NodeRow};
    use uuid::Uuid;

    use super::*;

    fn node_row(id: Uuid, name: &str, resource_value: f64) -> NodeRow {
        NodeRow {
            id,
            name: name.to_owned(),
            resource_value,
            max_capacity: 100.0,
            failure_threshold: 20.0,
        }
    }

    #[test]
    fn initial_record_is_pristine() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let definition = GraphDefinition {
            nodes: vec![node_row(a, "a", 90.0), node_row(b, "b", 70.0)],
            edges: vec![EdgeRow {
                source_node_id: a,
                target_node_id: b,
                weight: 35.0,
            }],
        };

        let graph_id = GraphId::new();
        let record = build_initial_record(graph_id, &definition);

        assert_eq!(record.graph_id, graph_id);
        assert_eq!(record.tick_count, 0);
        assert_eq!(record.version, 0);
        assert!(record.is_running);
        assert_eq!(record.nodes_state.len(), 2);
        assert!(record.nodes_state.values().all(|n| !n.failed));
        assert_eq!(record.analytics, Analytics::default());

        let edges_a = &record.adjacency[&NodeId::from(a)];
        assert_eq!(edges_a.len(), 1);
        assert_eq!(edges_a[0].target, NodeId::from(b));
        assert_eq!(edges_a[0].weight, 35.0);
        assert!(record.adjacency[&NodeId::from(b)].is_empty());
    }

    #[test]
    fn dangling_edges_are_skipped() {
        let a = Uuid::now_v7();
        let unknown = Uuid::now_v7();
        let definition = GraphDefinition {
            nodes: vec![node_row(a, "a", 90.0)],
            edges: vec![
                EdgeRow {
                    source_node_id: unknown,
                    target_node_id: a,
                    weight: 10.0,
                },
                EdgeRow {
                    source_node_id: a,
                    target_node_id: unknown,
                    weight: 10.0,
                },
            ],
        };

        let record = build_initial_record(GraphId::new(), &definition);

        assert_eq!(record.adjacency.len(), 1);
        assert!(record.adjacency[&NodeId::from(a)].is_empty());
    }

    #[test]
    fn record_key_embeds_graph_id() {
        let graph_id = GraphId::new();
        assert_eq!(record_key(graph_id), format!("sim:{graph_id}"));
    }
}
