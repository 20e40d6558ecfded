//! Structured events published to the live-update channel.
//!
//! After each committed tick the engine broadcasts a [`TickUpdate`] so
//! dashboards can render the cascade as it unfolds; on stop it broadcasts
//! a [`SimulationStopped`]. Both are plain JSON payloads -- the transport
//! (NATS subject per graph) is the publisher's concern, not this crate's.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{GraphId, NodeId};
use crate::record::{Analytics, NodeState};

/// Live update emitted after each committed tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickUpdate {
    /// The graph whose simulation advanced.
    pub graph_id: GraphId,
    /// The tick number that was just committed.
    pub tick_count: u64,
    /// Full node state at this tick.
    pub nodes_state: BTreeMap<NodeId, NodeState>,
    /// Analytics at this tick.
    pub analytics: Analytics,
}

/// Live update emitted when a simulation is stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStopped {
    /// The graph whose simulation was stopped.
    pub graph_id: GraphId,
    /// Always `"stopped"`; present so consumers can switch on it.
    pub status: String,
}

impl SimulationStopped {
    /// Build the stop event for a graph.
    pub fn new(graph_id: GraphId) -> Self {
        Self {
            graph_id,
            status: String::from("stopped"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn stopped_event_carries_status_string() {
        let event = SimulationStopped::new(GraphId::new());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json.get("status").and_then(|v| v.as_str()), Some("stopped"));
    }
}
