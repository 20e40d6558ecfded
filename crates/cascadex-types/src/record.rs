//! The live simulation aggregate and its derived analytics.
//!
//! One [`SimulationRecord`] exists per graph while a run is active. It is
//! stored as a single JSON blob in the shared hot store and is mutated
//! only through the optimistic-commit path: every committed tick bumps
//! `tick_count` and `version` by exactly one, and `version` is the field
//! the compare-and-swap checks. Direct writes from any other code path
//! are forbidden by design.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{GraphId, NodeId};

/// Mutable per-node state within a running simulation.
///
/// `max_capacity` and `failure_threshold` are immutable for the run;
/// `resource_value` is reduced by propagation and `failed` is sticky --
/// once a node fails it stays failed for the remainder of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    /// Human-readable node name.
    pub name: String,
    /// Current resource level, reduced by incoming propagation force.
    pub resource_value: f64,
    /// Maximum resource capacity, fixed for the run.
    pub max_capacity: f64,
    /// Failure threshold; the node fails when `resource_value` drops to
    /// or below this value.
    pub failure_threshold: f64,
    /// Whether the node has failed. Monotonic within a run.
    pub failed: bool,
}

/// A directed weighted edge in adjacency-list form.
///
/// The weight is the propagation force subtracted from the target's
/// resource value when the source fails.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutEdge {
    /// The downstream node this edge points at.
    pub target: NodeId,
    /// Propagation force applied to the target on source failure.
    pub weight: f64,
}

/// Node id of a most-impacted analytics entry plus its impact figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MostImpactedNode {
    /// The node with the largest capacity-to-current-value gap.
    pub node_id: NodeId,
    /// The node's name, copied for display convenience.
    pub name: String,
    /// `max_capacity - resource_value` at the time of aggregation.
    pub impact_value: f64,
}

/// Per-tick derived analytics, recomputed by the cascade evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    /// Percentage of nodes currently failed (0-100).
    pub failed_percentage: f64,
    /// Maximum propagation depth observed across all ticks of the run.
    /// Never decreases.
    pub cascade_depth: u32,
    /// The node with the largest `max_capacity - resource_value` gap,
    /// ties broken by first-encountered (ascending node id) order.
    pub most_impacted_node: Option<MostImpactedNode>,
    /// `max(0, 100 - failed_percentage)`.
    pub system_health_score: f64,
    /// All currently-failed node ids in ascending order.
    pub failed_node_ids: Vec<NodeId>,
}

impl Default for Analytics {
    fn default() -> Self {
        Self {
            failed_percentage: 0.0,
            cascade_depth: 0,
            most_impacted_node: None,
            system_health_score: 100.0,
            failed_node_ids: Vec::new(),
        }
    }
}

/// The shared-state aggregate for one running simulation.
///
/// Exists in the hot store only while a run is active: created atomically
/// at start, advanced one tick per optimistic commit, deleted on stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    /// The graph this simulation belongs to.
    pub graph_id: GraphId,
    /// Per-node mutable state.
    pub nodes_state: BTreeMap<NodeId, NodeState>,
    /// Outgoing edges per node, in graph-definition order. Every node has
    /// an entry, empty when it has no outgoing edges. Immutable for the run.
    pub adjacency: BTreeMap<NodeId, Vec<OutEdge>>,
    /// Number of committed ticks, starting at 0.
    pub tick_count: u64,
    /// Optimistic-concurrency version. Increments by exactly one per
    /// committed tick; never decreases, never reused.
    pub version: u64,
    /// Whether the simulation is running.
    pub is_running: bool,
    /// Derived analytics for the latest committed tick.
    pub analytics: Analytics,
}

/// Externally visible run status, served by the `status` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    /// Whether a simulation record exists and is running.
    pub is_running: bool,
    /// Ticks committed so far (0 when no record exists).
    pub tick_count: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn analytics_default_is_healthy() {
        let analytics = Analytics::default();
        assert_eq!(analytics.cascade_depth, 0);
        assert!(analytics.failed_node_ids.is_empty());
        assert!(analytics.most_impacted_node.is_none());
        assert!((analytics.system_health_score - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn record_roundtrips_through_json() {
        let graph_id = GraphId::new();
        let node_id = NodeId::new();
        let mut nodes_state = BTreeMap::new();
        nodes_state.insert(
            node_id,
            NodeState {
                name: String::from("api-gateway"),
                resource_value: 80.0,
                max_capacity: 100.0,
                failure_threshold: 20.0,
                failed: false,
            },
        );
        let mut adjacency = BTreeMap::new();
        adjacency.insert(node_id, Vec::new());

        let record = SimulationRecord {
            graph_id,
            nodes_state,
            adjacency,
            tick_count: 3,
            version: 3,
            is_running: true,
            analytics: Analytics::default(),
        };

        let json = serde_json::to_string(&record).unwrap();
        let restored: SimulationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }
}
