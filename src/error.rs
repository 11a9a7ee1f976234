//! Error types for the training orchestrator.

use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, TrainError>;

/// Errors raised by a `TrainableModel` implementation.
///
/// These never cross back into the controller's call stack; the worker turns
/// them into an `error` progress event and a `Failed` session.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Input or label dimensions do not match the model.
    #[error("shape mismatch: expected {expected} features, got {actual}")]
    ShapeMismatch {
        expected: usize,
        actual: usize,
    },

    /// A batch with no samples was handed to the model.
    #[error("empty batch")]
    EmptyBatch,

    /// `backward_and_step` called without a preceding training-mode `forward`.
    #[error("no pending gradients; call forward() before backward_and_step()")]
    NoPendingGradients,

    /// The loss became NaN or infinite.
    #[error("loss diverged at epoch {epoch}, batch {batch}: {loss}")]
    Diverged {
        epoch: usize,
        batch: usize,
        loss: f64,
    },

    /// The model implementation panicked.
    #[error("model panicked: {0}")]
    Panicked(String),

    /// Parameters could not be serialized for checkpointing.
    #[error("failed to serialize model parameters: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Any other failure reported by the model.
    #[error("{0}")]
    Other(String),
}

/// Errors surfaced synchronously by the orchestrator and its collaborators.
#[derive(Debug, Error)]
pub enum TrainError {
    /// A class has fewer samples than the requested train + validation quota.
    #[error("class {label} has {available} samples, {required} required")]
    InsufficientSamples {
        label: usize,
        available: usize,
        required: usize,
    },

    /// The pool the test subset is drawn from is smaller than `test_size`.
    #[error("test pool has {available} samples, {requested} requested")]
    TestPoolTooSmall {
        available: usize,
        requested: usize,
    },

    /// Invalid configuration parameter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed or inconsistent dataset.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Failure inside the model capability.
    #[error("training failure: {0}")]
    Model(#[from] ModelError),

    /// The checkpoint store could not persist the model.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
