//! Data layer for the CascadeX simulation engine (Redis + `PostgreSQL`).
//!
//! Redis serves as the shared hot state: the live simulation record,
//! the run claim, and the tick queue all live there because multiple
//! worker processes coordinate through them every tick. `PostgreSQL`
//! serves as the cold state: static graph definitions (read-only here)
//! and the append-only simulation history used for replay.
//!
//! # Architecture
//!
//! ```text
//! Tick Execution
//!     |
//!     +-- Record read / CAS commit ----> Redis (RedisPool)
//!     +-- Claim acquire/renew/release -> Redis (RedisPool)
//!     +-- Tick queue push/pop ---------> Redis (RedisPool)
//!     |
//!     +-- Graph load at start ---------> PostgreSQL (GraphStore)
//!     +-- Async history append --------> PostgreSQL (HistoryStore)
//! ```
//!
//! # Modules
//!
//! - [`redis`] -- Redis hot state primitives (JSON records, CAS, queue)
//! - [`postgres`] -- `PostgreSQL` connection pool and migrations
//! - [`graph_store`] -- Static graph definition reads
//! - [`history_store`] -- Append-only per-tick snapshots
//! - [`error`] -- Shared error types

pub mod error;
pub mod graph_store;
pub mod history_store;
pub mod postgres;
pub mod redis;

// Re-export primary types for convenience.
pub use error::DbError;
pub use graph_store::{EdgeRow, GraphDefinition, GraphStore, NodeRow};
pub use history_store::{HistoryRow, HistoryStore};
pub use postgres::{PostgresConfig, PostgresPool};
pub use redis::{CasOutcome, RedisPool};
