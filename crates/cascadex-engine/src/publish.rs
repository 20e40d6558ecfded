//! Live-update publishing seam.
//!
//! The engine broadcasts a [`TickUpdate`] after every committed tick and
//! a [`SimulationStopped`] on stop. The transport is behind a trait so
//! the engine library carries no messaging dependency; the worker binary
//! provides the NATS implementation. Publishing is strictly
//! fire-and-forget -- implementations must not block the tick pipeline
//! and must swallow (log) their own delivery failures.

use cascadex_types::{SimulationStopped, TickUpdate};

/// Sink for live simulation updates.
pub trait UpdatePublisher: Send + Sync {
    /// Broadcast the state of a just-committed tick.
    fn publish_tick(&self, update: TickUpdate);

    /// Broadcast that a simulation was stopped.
    fn publish_stopped(&self, event: SimulationStopped);
}

/// Publisher that discards every update. Used in tests and in
/// deployments with no live-update consumers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpPublisher;

impl UpdatePublisher for NoOpPublisher {
    fn publish_tick(&self, _update: TickUpdate) {}

    fn publish_stopped(&self, _event: SimulationStopped) {}
}
