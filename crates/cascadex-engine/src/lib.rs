//! CascadeX simulation engine: tick-based cascading-failure propagation
//! over shared state.
//!
//! The engine simulates failure cascades on directed weighted dependency
//! graphs. All mutable run state lives in a Redis-compatible store so
//! that a pool of identical worker processes can cooperate on the same
//! simulations; correctness under that concurrency rests on three
//! mechanisms rather than on any in-process lock:
//!
//! - a **run claim** (TTL'd key) admits at most one live run per graph,
//! - a **deduplicating delay queue** holds at most one pending tick job
//!   per graph,
//! - an **optimistic commit** (version compare-and-swap) lets exactly
//!   one worker land each tick; losers discard their work, which is
//!   safe because evaluation is pure and deterministic.
//!
//! # Modules
//!
//! - [`cascade`] -- pure tick evaluation (threshold sweep, BFS
//!   propagation, analytics)
//! - [`store`] -- record storage and the optimistic committer
//! - [`claim`] -- run claim acquire/renew/release
//! - [`queue`] -- the durable tick queue with bounded retries
//! - [`engine`] -- the facade: start/stop/status, tick pipeline,
//!   recovery sweep
//! - [`publish`] -- live-update publishing seam
//! - [`config`] -- YAML configuration with env overrides
//! - [`error`] -- engine error taxonomy

pub mod cascade;
pub mod claim;
pub mod config;
pub mod engine;
pub mod error;
pub mod publish;
pub mod queue;
pub mod store;

// Re-export primary types for convenience.
pub use cascade::{TickEvaluation, evaluate_tick};
pub use claim::RunClaims;
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, TickOutcome};
pub use error::EngineError;
pub use publish::{NoOpPublisher, UpdatePublisher};
pub use queue::{FailureDisposition, TickQueue};
pub use store::{CommitOutcome, RecordStore, build_initial_record};
