//! Worker binary error types.

use cascadex_db::DbError;
use cascadex_engine::{ConfigError, EngineError};

/// Errors that abort worker startup or shutdown.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A data-layer connection or operation failed.
    #[error(transparent)]
    Db(#[from] DbError),

    /// An engine operation failed during startup.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The NATS connection failed.
    #[error("NATS error: {message}")]
    Nats {
        /// Description of the failure.
        message: String,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
