//! NATS implementation of the live-update publishing seam.
//!
//! Updates are published as JSON on a per-graph subject,
//! `cascadex.sim.{graph_id}`, so dashboards subscribe only to the graphs
//! they display. Publishing is fire-and-forget from the tick pipeline's
//! perspective: each call spawns a task that serializes and publishes,
//! and delivery failures are logged, never surfaced. A lost update is
//! acceptable; a stalled tick is not.

use cascadex_engine::UpdatePublisher;
use cascadex_types::{GraphId, SimulationStopped, TickUpdate};
use tracing::warn;

use crate::error::WorkerError;

/// Publishes live simulation updates over NATS.
pub struct NatsPublisher {
    client: async_nats::Client,
}

impl NatsPublisher {
    /// Connect to a NATS server.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Nats`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, WorkerError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| WorkerError::Nats {
                message: format!("failed to connect to NATS at {url}: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Subject for a graph's live updates.
    fn subject(graph_id: GraphId) -> String {
        format!("cascadex.sim.{graph_id}")
    }

    /// Serialize and publish a payload without blocking the caller.
    fn publish_json<T: serde::Serialize + Send + 'static>(
        &self,
        graph_id: GraphId,
        kind: &'static str,
        payload: T,
    ) {
        let client = self.client.clone();
        tokio::spawn(async move {
            let subject = Self::subject(graph_id);
            match serde_json::to_vec(&payload) {
                Ok(bytes) => {
                    if let Err(error) = client.publish(subject, bytes.into()).await {
                        warn!(%graph_id, kind, %error, "Failed to publish live update");
                    }
                }
                Err(error) => {
                    warn!(%graph_id, kind, %error, "Failed to serialize live update");
                }
            }
        });
    }
}

impl UpdatePublisher for NatsPublisher {
    fn publish_tick(&self, update: TickUpdate) {
        self.publish_json(update.graph_id, "tick_update", update);
    }

    fn publish_stopped(&self, event: SimulationStopped) {
        self.publish_json(event.graph_id, "simulation_stopped", event);
    }
}
