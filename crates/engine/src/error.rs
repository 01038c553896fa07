use entity_override_core::CoreError;
use entity_override_storage::StorageError;
use thiserror::Error;

use crate::registry::Violation;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("invalid settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("unknown bundle: {0}")]
    UnknownBundle(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("field {field} has no delta {delta}")]
    InvalidDelta { field: String, delta: usize },

    #[error("field {field} allows at most {max} values")]
    CardinalityExceeded { field: String, max: usize },

    #[error("triggering element not found: {0}")]
    InvalidTrigger(String),

    #[error("validation failed: {}", .0.iter().map(|v| v.message.as_str()).collect::<Vec<_>>().join("; "))]
    Validation(Vec<Violation>),
}
