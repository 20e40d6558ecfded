//! Shared type definitions for the CascadeX simulation engine.
//!
//! This crate holds the data model that every other crate agrees on:
//! strongly-typed identifiers, the live [`SimulationRecord`] aggregate
//! that the tick pipeline mutates through optimistic commits, the
//! per-tick [`Analytics`] aggregate, and the structured events published
//! to the live-update channel.
//!
//! All keyed state uses [`std::collections::BTreeMap`] so iteration
//! order is deterministic -- the cascade evaluator depends on this for
//! its pure-function guarantee.

pub mod events;
pub mod ids;
pub mod record;

pub use events::{SimulationStopped, TickUpdate};
pub use ids::{GraphId, NodeId};
pub use record::{
    Analytics, MostImpactedNode, NodeState, OutEdge, RunStatus, SimulationRecord,
};
