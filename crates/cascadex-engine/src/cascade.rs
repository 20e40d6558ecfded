//! The cascade evaluator: one tick of failure propagation.
//!
//! Pure and deterministic -- no I/O, no clock, no randomness. Given a
//! [`SimulationRecord`] it produces the record one tick later, so the
//! same input always yields byte-identical output regardless of which
//! worker runs it. That property is what makes the optimistic commit
//! safe: a losing worker's discarded evaluation is interchangeable with
//! the winner's.
//!
//! A tick has three phases:
//!
//! 1. **Threshold sweep** -- every live node whose `resource_value` is at
//!    or below its `failure_threshold` fails. These seeds enter the
//!    propagation frontier at depth 0.
//! 2. **Breadth-first propagation** -- each failed node pushes its edge
//!    weight onto downstream live nodes; nodes driven to their threshold
//!    fail in turn and join the frontier one level deeper. Failed nodes
//!    absorb no further damage, so propagation terminates on any graph,
//!    cycles included.
//! 3. **Analytics aggregation** -- failure percentage, health score,
//!    failed-node list, most-impacted node, and the running maximum
//!    cascade depth.

use std::collections::{BTreeSet, VecDeque};

use cascadex_types::{Analytics, MostImpactedNode, NodeId, NodeState, SimulationRecord};

/// Result of evaluating one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickEvaluation {
    /// The record one tick later. `tick_count` and `version` are NOT
    /// advanced here; the committer bumps both atomically.
    pub record: SimulationRecord,
    /// Nodes that transitioned to failed during this tick, in the order
    /// they failed.
    pub newly_failed: Vec<NodeId>,
    /// Deepest propagation level reached this tick (0 when only the
    /// threshold sweep fired, or nothing failed).
    pub max_depth_this_tick: u32,
}

/// Evaluate one tick of the simulation.
///
/// The input record is unchanged; the evaluation carries the advanced
/// copy. Node failure is sticky: a failed node never un-fails and never
/// takes further damage.
#[must_use]
pub fn evaluate_tick(record: &SimulationRecord) -> TickEvaluation {
    let mut next = record.clone();
    let mut newly_failed = Vec::new();
    let mut frontier: VecDeque<(NodeId, u32)> = VecDeque::new();
    let mut visited: BTreeSet<NodeId> = BTreeSet::new();
    let mut max_depth: u32 = 0;

    let SimulationRecord {
        nodes_state,
        adjacency,
        analytics,
        ..
    } = &mut next;

    // Phase 1: threshold sweep in ascending node-id order.
    for (id, node) in &mut *nodes_state {
        if !node.failed && node.resource_value <= node.failure_threshold {
            node.failed = true;
            newly_failed.push(*id);
            visited.insert(*id);
            frontier.push_back((*id, 0));
        }
    }

    // Phase 2: breadth-first propagation.
    while let Some((source, depth)) = frontier.pop_front() {
        max_depth = max_depth.max(depth);

        let Some(edges) = adjacency.get(&source) else {
            continue;
        };
        for edge in edges {
            let Some(target) = nodes_state.get_mut(&edge.target) else {
                continue;
            };
            if target.failed {
                continue;
            }
            target.resource_value -= edge.weight;
            if target.resource_value <= target.failure_threshold {
                target.failed = true;
                newly_failed.push(edge.target);
                if visited.insert(edge.target) {
                    frontier.push_back((edge.target, depth.saturating_add(1)));
                }
            }
        }
    }

    // Phase 3: analytics. Cascade depth is a running maximum over the
    // whole run, never reset by a quiet tick.
    *analytics = aggregate_analytics(nodes_state, analytics.cascade_depth.max(max_depth));

    TickEvaluation {
        record: next,
        newly_failed,
        max_depth_this_tick: max_depth,
    }
}

/// Recompute derived analytics from current node state.
fn aggregate_analytics(
    nodes_state: &std::collections::BTreeMap<NodeId, NodeState>,
    cascade_depth: u32,
) -> Analytics {
    let total = nodes_state.len();
    let failed_node_ids: Vec<NodeId> = nodes_state
        .iter()
        .filter(|(_, node)| node.failed)
        .map(|(id, _)| *id)
        .collect();

    let failed_percentage = if total == 0 {
        0.0
    } else {
        // Node counts are far below f64's integer precision limit.
        #[allow(clippy::cast_precision_loss)]
        let ratio = failed_node_ids.len() as f64 / total as f64;
        ratio * 100.0
    };

    let mut most_impacted: Option<MostImpactedNode> = None;
    for (id, node) in nodes_state {
        let impact = node.max_capacity - node.resource_value;
        // Strict comparison keeps the first-encountered node on ties
        // (ascending id order, so the result is deterministic).
        let beats_current = most_impacted
            .as_ref()
            .is_none_or(|current| impact > current.impact_value);
        if beats_current {
            most_impacted = Some(MostImpactedNode {
                node_id: *id,
                name: node.name.clone(),
                impact_value: impact,
            });
        }
    }

    Analytics {
        failed_percentage,
        cascade_depth,
        most_impacted_node: most_impacted,
        system_health_score: (100.0 - failed_percentage).max(0.0),
        failed_node_ids,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use std::collections::BTreeMap;

    use cascadex_types::{GraphId, OutEdge};
    use uuid::Uuid;

    use super::*;

    /// Fixed node ids so the ascending-id iteration order is known:
    /// `node(0) < node(1) < ...`
    fn node(n: u8) -> NodeId {
        NodeId::from(Uuid::from_u128(u128::from(n).wrapping_add(1)))
    }

    fn healthy(name: &str, resource_value: f64) -> NodeState {
        NodeState {
            name: name.to_owned(),
            resource_value,
            max_capacity: 100.0,
            failure_threshold: 20.0,
            failed: false,
        }
    }

    fn record(
        nodes: Vec<(NodeId, NodeState)>,
        edges: Vec<(NodeId, NodeId, f64)>,
    ) -> SimulationRecord {
        let nodes_state: BTreeMap<NodeId, NodeState> = nodes.into_iter().collect();
        let mut adjacency: BTreeMap<NodeId, Vec<OutEdge>> = nodes_state
            .keys()
            .map(|id| (*id, Vec::new()))
            .collect();
        for (source, target, weight) in edges {
            adjacency
                .get_mut(&source)
                .unwrap()
                .push(OutEdge { target, weight });
        }
        SimulationRecord {
            graph_id: GraphId::new(),
            nodes_state,
            adjacency,
            tick_count: 0,
            version: 0,
            is_running: true,
            analytics: Analytics::default(),
        }
    }

    #[test]
    fn chain_cascades_in_one_tick() {
        // a (below threshold) -> b -> c, weights large enough to fail each
        let a = node(0);
        let b = node(1);
        let c = node(2);
        let rec = record(
            vec![
                (a, healthy("a", 10.0)),
                (b, healthy("b", 100.0)),
                (c, healthy("c", 100.0)),
            ],
            vec![(a, b, 90.0), (b, c, 90.0)],
        );

        let eval = evaluate_tick(&rec);

        assert_eq!(eval.newly_failed, vec![a, b, c]);
        assert_eq!(eval.max_depth_this_tick, 2);
        let result = &eval.record;
        assert!(result.nodes_state[&a].failed);
        assert!(result.nodes_state[&b].failed);
        assert!(result.nodes_state[&c].failed);
        assert_eq!(result.nodes_state[&b].resource_value, 10.0);
        assert_eq!(result.analytics.cascade_depth, 2);
        assert_eq!(result.analytics.failed_percentage, 100.0);
        assert_eq!(result.analytics.system_health_score, 0.0);
        assert_eq!(result.analytics.failed_node_ids, vec![a, b, c]);
    }

    #[test]
    fn healthy_graph_is_a_no_op() {
        let a = node(0);
        let b = node(1);
        let rec = record(
            vec![(a, healthy("a", 95.0)), (b, healthy("b", 80.0))],
            vec![(a, b, 30.0)],
        );

        let eval = evaluate_tick(&rec);

        assert!(eval.newly_failed.is_empty());
        assert_eq!(eval.max_depth_this_tick, 0);
        assert_eq!(eval.record.nodes_state[&b].resource_value, 80.0);
        assert_eq!(eval.record.analytics.system_health_score, 100.0);
        assert!(eval.record.analytics.failed_node_ids.is_empty());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let a = node(0);
        let b = node(1);
        let c = node(2);
        let rec = record(
            vec![
                (a, healthy("a", 15.0)),
                (b, healthy("b", 40.0)),
                (c, healthy("c", 60.0)),
            ],
            vec![(a, b, 25.0), (a, c, 10.0), (b, c, 50.0)],
        );

        let first = evaluate_tick(&rec);
        let second = evaluate_tick(&rec);

        let json_first = serde_json::to_value(&first.record).unwrap();
        let json_second = serde_json::to_value(&second.record).unwrap();
        assert_eq!(json_first, json_second);
        assert_eq!(first.newly_failed, second.newly_failed);
    }

    #[test]
    fn threshold_equality_counts_as_failure() {
        let a = node(0);
        let rec = record(vec![(a, healthy("a", 20.0))], vec![]);

        let eval = evaluate_tick(&rec);

        assert_eq!(eval.newly_failed, vec![a]);
        assert!(eval.record.nodes_state[&a].failed);
    }

    #[test]
    fn failed_nodes_absorb_no_further_damage() {
        // b already failed; a's failure must not reduce b's resources
        let a = node(0);
        let b = node(1);
        let mut failed_b = healthy("b", 5.0);
        failed_b.failed = true;
        let rec = record(
            vec![(a, healthy("a", 10.0)), (b, failed_b)],
            vec![(a, b, 50.0)],
        );

        let eval = evaluate_tick(&rec);

        assert_eq!(eval.newly_failed, vec![a]);
        assert_eq!(eval.record.nodes_state[&b].resource_value, 5.0);
        assert!(eval.record.nodes_state[&b].failed, "failure is sticky");
    }

    #[test]
    fn cycle_terminates() {
        // a -> b -> c -> a with failing seed; must not loop forever
        let a = node(0);
        let b = node(1);
        let c = node(2);
        let rec = record(
            vec![
                (a, healthy("a", 10.0)),
                (b, healthy("b", 50.0)),
                (c, healthy("c", 50.0)),
            ],
            vec![(a, b, 90.0), (b, c, 90.0), (c, a, 90.0)],
        );

        let eval = evaluate_tick(&rec);

        assert_eq!(eval.newly_failed, vec![a, b, c]);
        assert_eq!(eval.max_depth_this_tick, 2);
        // a was already failed when c's edge fired, so its value is intact
        assert_eq!(eval.record.nodes_state[&a].resource_value, 10.0);
    }

    #[test]
    fn cascade_depth_never_decreases() {
        let a = node(0);
        let mut rec = record(vec![(a, healthy("a", 95.0))], vec![]);
        rec.analytics.cascade_depth = 7;

        let eval = evaluate_tick(&rec);

        assert_eq!(eval.max_depth_this_tick, 0);
        assert_eq!(eval.record.analytics.cascade_depth, 7);
    }

    #[test]
    fn partial_damage_without_failure_persists() {
        // a fails, b takes damage but stays above threshold
        let a = node(0);
        let b = node(1);
        let rec = record(
            vec![(a, healthy("a", 10.0)), (b, healthy("b", 80.0))],
            vec![(a, b, 30.0)],
        );

        let eval = evaluate_tick(&rec);

        assert_eq!(eval.newly_failed, vec![a]);
        assert_eq!(eval.max_depth_this_tick, 0);
        let b_state = &eval.record.nodes_state[&b];
        assert_eq!(b_state.resource_value, 50.0);
        assert!(!b_state.failed);
        assert_eq!(eval.record.analytics.failed_node_ids, vec![a]);
    }

    #[test]
    fn most_impacted_ties_go_to_lowest_id() {
        // Both nodes have identical impact; ascending id order wins
        let a = node(0);
        let b = node(1);
        let rec = record(
            vec![(a, healthy("a", 60.0)), (b, healthy("b", 60.0))],
            vec![],
        );

        let eval = evaluate_tick(&rec);

        let most = eval.record.analytics.most_impacted_node.unwrap();
        assert_eq!(most.node_id, a);
        assert_eq!(most.impact_value, 40.0);
    }

    #[test]
    fn empty_graph_yields_pristine_analytics() {
        let rec = record(vec![], vec![]);

        let eval = evaluate_tick(&rec);

        assert!(eval.newly_failed.is_empty());
        assert_eq!(eval.record.analytics.failed_percentage, 0.0);
        assert_eq!(eval.record.analytics.system_health_score, 100.0);
        assert!(eval.record.analytics.most_impacted_node.is_none());
    }

    #[test]
    fn fan_out_counts_depth_once() {
        // a fails and takes out b and c directly: both at depth 1
        let a = node(0);
        let b = node(1);
        let c = node(2);
        let rec = record(
            vec![
                (a, healthy("a", 10.0)),
                (b, healthy("b", 30.0)),
                (c, healthy("c", 30.0)),
            ],
            vec![(a, b, 50.0), (a, c, 50.0)],
        );

        let eval = evaluate_tick(&rec);

        assert_eq!(eval.newly_failed, vec![a, b, c]);
        assert_eq!(eval.max_depth_this_tick, 1);
    }

    #[test]
    fn accumulated_damage_from_multiple_seeds() {
        // Neither seed alone fails c, but together they do
        let a = node(0);
        let b = node(1);
        let c = node(2);
        let rec = record(
            vec![
                (a, healthy("a", 10.0)),
                (b, healthy("b", 15.0)),
                (c, healthy("c", 70.0)),
            ],
            vec![(a, c, 30.0), (b, c, 30.0)],
        );

        let eval = evaluate_tick(&rec);

        // c: 70 - 30 - 30 = 10 <= 20 -> failed at depth 1
        assert_eq!(eval.newly_failed, vec![a, b, c]);
        assert_eq!(eval.record.nodes_state[&c].resource_value, 10.0);
        assert_eq!(eval.max_depth_this_tick, 1);
    }

    #[test]
    fn tick_and_version_are_not_advanced_by_evaluation() {
        let a = node(0);
        let mut rec = record(vec![(a, healthy("a", 50.0))], vec![]);
        rec.tick_count = 4;
        rec.version = 4;

        let eval = evaluate_tick(&rec);

        assert_eq!(eval.record.tick_count, 4);
        assert_eq!(eval.record.version, 4);
    }
}
