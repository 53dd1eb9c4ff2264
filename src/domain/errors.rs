//! Error taxonomy for the agent runtime.
//!
//! Errors are partitioned the way the runtime's callers need to react to them:
//! configuration and provider errors are exceptional (fail fast), while
//! per-item execution errors inside a swarm operation are values, not
//! exceptions (see `SwarmResult`).

use uuid::Uuid;

/// Closed error taxonomy for the public session/swarm/pipeline contracts.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("sandbox provider error: {0}")]
    Provider(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("checkpoint incompatible with session: {0}")]
    IncompatibleCheckpoint(String),

    #[error("a second operation cannot start while {opid} is active")]
    ConcurrentOperation { opid: u64 },

    #[error("schema is invalid: {0}")]
    SchemaInvalid(String),

    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors from the `StorageClient` port and its adapters.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(Uuid),

    #[error("query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("invalid uuid: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("archive io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("migration error: {0}")]
    MigrationError(String),
}

impl From<anyhow::Error> for RuntimeError {
    fn from(err: anyhow::Error) -> Self {
        Self::Execution(err.to_string())
    }
}
