//! The engine facade: start, stop, status, and the tick pipeline.
//!
//! One [`Engine`] per worker process. All coordination state lives in
//! the shared stores, so any number of engines across any number of
//! processes can serve the same graphs -- the run claim decides who may
//! start a run, and the optimistic commit decides whose tick lands.

use std::sync::Arc;
use std::time::Duration;

use cascadex_db::{GraphStore, HistoryStore, PostgresPool, RedisPool};
use cascadex_types::{GraphId, RunStatus, SimulationRecord, SimulationStopped, TickUpdate};

use crate::cascade::evaluate_tick;
use crate::claim::RunClaims;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::publish::UpdatePublisher;
use crate::queue::{FailureDisposition, TickQueue};
use crate::store::{CommitOutcome, RecordStore, build_initial_record};

/// Outcome of one tick execution. Only `Committed` advanced the
/// simulation; every other variant is a benign concurrent-worker no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick was evaluated and committed by this worker.
    Committed {
        /// Tick count after the commit.
        tick: u64,
        /// Record version after the commit.
        version: u64,
    },
    /// The run claim expired or was released; the tick was abandoned
    /// before reading any state.
    ClaimLost,
    /// No record exists for the graph (stopped before this tick ran).
    Missing,
    /// The record exists but is not running, or was stopped mid-tick.
    Stopped,
    /// Another worker committed this tick first; the evaluation was
    /// discarded.
    VersionConflict,
}

/// The simulation engine facade.
pub struct Engine {
    records: RecordStore,
    graphs: GraphStore,
    history: HistoryStore,
    queue: TickQueue,
    claims: RunClaims,
    publisher: Arc<dyn UpdatePublisher>,
    tick_interval: Duration,
}

impl Engine {
    /// Wire an engine from connected pools and configuration.
    pub fn new(
        redis: RedisPool,
        postgres: &PostgresPool,
        publisher: Arc<dyn UpdatePublisher>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            records: RecordStore::new(redis.clone()),
            graphs: GraphStore::new(postgres.pool().clone()),
            history: HistoryStore::new(postgres.pool().clone()),
            queue: TickQueue::new(
                redis.clone(),
                config.scheduler.max_tick_attempts,
                config.scheduler.retry_base_delay_ms,
                config.scheduler.retry_jitter_ms,
            ),
            claims: RunClaims::new(redis, config.simulation.claim_ttl_secs),
            publisher,
            tick_interval: Duration::from_millis(config.simulation.tick_interval_ms),
        }
    }

    /// Start a simulation for a graph.
    ///
    /// Acquires the run claim, loads the graph definition, writes the
    /// initial record, and enqueues the first tick immediately. The
    /// claim is released again if anything after acquisition fails, so
    /// a failed start never blocks the graph until TTL expiry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyRunning`] when the claim is held,
    /// [`EngineError::NotFound`] when the graph has no nodes, or
    /// [`EngineError::Db`] on store failures.
    pub async fn start(&self, graph_id: GraphId) -> Result<SimulationRecord, EngineError> {
        if !self.claims.acquire(graph_id).await? {
            return Err(EngineError::AlreadyRunning { graph_id });
        }

        match self.start_run(graph_id).await {
            Ok(record) => Ok(record),
            Err(error) => {
                if let Err(release_error) = self.claims.release(graph_id).await {
                    tracing::warn!(
                        %graph_id,
                        error = %release_error,
                        "Failed to release claim after aborted start"
                    );
                }
                Err(error)
            }
        }
    }

    async fn start_run(&self, graph_id: GraphId) -> Result<SimulationRecord, EngineError> {
        let definition = self.graphs.load_graph(graph_id).await?;
        if definition.nodes.is_empty() {
            return Err(EngineError::NotFound { graph_id });
        }

        // A stale record from a previous run is overwritten here; the
        // claim, not the record, is the gate for "already running".
        let record = build_initial_record(graph_id, &definition);
        self.records.write(&record).await?;
        self.queue.clear_attempts(graph_id).await?;
        self.queue.enqueue(graph_id, Duration::ZERO).await?;

        tracing::info!(
            %graph_id,
            nodes = record.nodes_state.len(),
            "Started simulation"
        );
        Ok(record)
    }

    /// Stop a graph's simulation. Idempotent; returns `true` when a
    /// live record existed.
    ///
    /// Deletes the record (any in-flight commit now observes `Stopped`),
    /// removes the pending tick job, releases the claim, and broadcasts
    /// the stop event.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] on store failures.
    pub async fn stop(&self, graph_id: GraphId) -> Result<bool, EngineError> {
        let existed = self.records.delete(graph_id).await?;
        self.queue.remove(graph_id).await?;
        self.queue.clear_attempts(graph_id).await?;
        self.claims.release(graph_id).await?;
        self.publisher
            .publish_stopped(SimulationStopped::new(graph_id));

        tracing::info!(%graph_id, existed, "Stopped simulation");
        Ok(existed)
    }

    /// Report whether a graph's simulation is running and its tick count.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] on store failures.
    pub async fn status(&self, graph_id: GraphId) -> Result<RunStatus, EngineError> {
        let status = (self.records.load(graph_id).await?).map_or(
            RunStatus {
                is_running: false,
                tick_count: 0,
            },
            |record| RunStatus {
                is_running: record.is_running,
                tick_count: record.tick_count,
            },
        );
        Ok(status)
    }

    /// Execute one tick for a graph: renew the claim, read, evaluate,
    /// commit, record history, broadcast, and schedule the next tick.
    ///
    /// Every early exit is a deliberate no-op (see [`TickOutcome`]);
    /// only store failures are errors.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] on store failures.
    pub async fn run_tick(&self, graph_id: GraphId) -> Result<TickOutcome, EngineError> {
        if !self.claims.renew(graph_id).await? {
            tracing::debug!(%graph_id, "Run claim gone; abandoning tick");
            return Ok(TickOutcome::ClaimLost);
        }

        let Some(record) = self.records.load(graph_id).await? else {
            tracing::debug!(%graph_id, "No live record; tick is a no-op");
            return Ok(TickOutcome::Missing);
        };
        if !record.is_running {
            tracing::debug!(%graph_id, "Record is not running; tick is a no-op");
            return Ok(TickOutcome::Stopped);
        }

        let expected_version = record.version;
        let evaluation = evaluate_tick(&record);
        let newly_failed = evaluation.newly_failed.len();

        match self
            .records
            .commit(evaluation.record, expected_version)
            .await?
        {
            CommitOutcome::Committed(committed) => {
                let committed = *committed;
                let tick = committed.tick_count;
                let version = committed.version;

                self.spawn_history_write(&committed);
                self.publisher.publish_tick(TickUpdate {
                    graph_id,
                    tick_count: tick,
                    nodes_state: committed.nodes_state,
                    analytics: committed.analytics.clone(),
                });
                self.queue.enqueue(graph_id, self.tick_interval).await?;

                tracing::info!(
                    %graph_id,
                    tick,
                    version,
                    newly_failed,
                    cascade_depth = committed.analytics.cascade_depth,
                    health = committed.analytics.system_health_score,
                    "Committed tick"
                );
                Ok(TickOutcome::Committed { tick, version })
            }
            CommitOutcome::VersionConflict => {
                tracing::debug!(%graph_id, expected_version, "Lost commit race; discarding tick");
                Ok(TickOutcome::VersionConflict)
            }
            CommitOutcome::Stopped => {
                tracing::debug!(%graph_id, "Simulation stopped mid-tick; discarding tick");
                Ok(TickOutcome::Stopped)
            }
        }
    }

    /// Poll the queue and run one tick job if one is due.
    ///
    /// Returns `false` when the queue had nothing due (the caller should
    /// idle-sleep). Tick failures feed the bounded-retry path and are
    /// not surfaced as errors; only queue-bookkeeping failures are.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] when queue operations themselves fail.
    pub async fn process_next_job(&self) -> Result<bool, EngineError> {
        let Some(graph_id) = self.queue.poll().await? else {
            return Ok(false);
        };

        match self.run_tick(graph_id).await {
            Ok(TickOutcome::Committed { .. }) => {
                self.queue.clear_attempts(graph_id).await?;
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%graph_id, %error, "Tick attempt failed");
                match self.queue.record_failure(graph_id).await? {
                    FailureDisposition::Retry { attempt, delay } => {
                        tracing::warn!(
                            %graph_id,
                            attempt,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "Retrying tick after backoff"
                        );
                        self.queue.enqueue(graph_id, delay).await?;
                    }
                    FailureDisposition::GiveUp { attempts } => {
                        tracing::error!(
                            %graph_id,
                            attempts,
                            "Tick failed fatally; dropping job"
                        );
                    }
                }
            }
        }
        Ok(true)
    }

    /// Append the committed tick to durable history, off the tick's
    /// critical path. A failed write is logged and never fails the tick;
    /// history is best-effort relative to live state.
    fn spawn_history_write(&self, committed: &SimulationRecord) {
        let history = self.history.clone();
        let graph_id = committed.graph_id;
        let tick = committed.tick_count;
        let nodes_state = committed.nodes_state.clone();
        let analytics = committed.analytics.clone();
        tokio::spawn(async move {
            if let Err(error) = history
                .insert(graph_id, tick, &nodes_state, &analytics)
                .await
            {
                tracing::warn!(%graph_id, tick, %error, "History write failed");
            }
        });
    }

    /// Re-enqueue an immediate tick job for every running simulation.
    ///
    /// Run at worker startup so simulations orphaned by a crash resume.
    /// The queue's member dedupe makes the sweep idempotent: a job that
    /// is still pending is not duplicated, and concurrent sweeps from
    /// several workers yield one job per graph. Claims are untouched --
    /// the dead worker's claim simply expires.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] on store failures.
    pub async fn recover_running_simulations(&self) -> Result<u32, EngineError> {
        let graph_ids = self.records.running_graph_ids().await?;
        let mut enqueued: u32 = 0;
        for graph_id in graph_ids {
            if self.queue.enqueue(graph_id, Duration::ZERO).await? {
                tracing::info!(%graph_id, "Recovered orphaned simulation");
                enqueued = enqueued.saturating_add(1);
            }
        }
        Ok(enqueued)
    }
}
