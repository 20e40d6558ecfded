//! Engine error types.
//!
//! Only genuine failures are errors. Losing the run claim, losing a
//! commit race, and finding a record already deleted are all expected
//! outcomes of concurrent workers and are modeled as
//! [`TickOutcome`](crate::engine::TickOutcome) variants instead.

use cascadex_db::DbError;
use cascadex_types::GraphId;

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A simulation for this graph is already running (its run claim is
    /// held).
    #[error("simulation already running for graph {graph_id}")]
    AlreadyRunning {
        /// The graph whose claim is already held.
        graph_id: GraphId,
    },

    /// The graph has no nodes, so there is nothing to simulate.
    #[error("graph {graph_id} not found or empty")]
    NotFound {
        /// The graph that could not be loaded.
        graph_id: GraphId,
    },

    /// A data-layer operation failed.
    #[error(transparent)]
    Db(#[from] DbError),
}
