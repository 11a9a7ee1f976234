//! The trainable-model capability the worker drives.
//!
//! The orchestrator never looks inside a model: it hands batches to
//! `forward`, applies the update with `backward_and_step`, scores held-out
//! data with `evaluate`, and exports parameters for the checkpoint store.

pub mod mlp;

use std::sync::Arc;

use rand::rngs::StdRng;

use crate::error::ModelError;

pub use mlp::MlpClassifier;

/// A borrowed mini-batch of samples with class-index labels.
#[derive(Debug, Clone, Default)]
pub struct Batch<'a> {
    pub inputs: Vec<&'a [f64]>,
    pub labels: Vec<usize>,
}

impl<'a> Batch<'a> {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Result of a training-mode forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardOutput {
    /// Mean loss over the batch.
    pub loss: f64,
    /// Predicted class per sample.
    pub predictions: Vec<usize>,
}

impl ForwardOutput {
    /// Number of predictions matching `labels`.
    pub fn correct(&self, labels: &[usize]) -> usize {
        self.predictions.iter().zip(labels).filter(|(p, l)| p == l).count()
    }
}

/// Summable evaluation counters; combine batches with `merge`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvalMetrics {
    pub loss_sum: f64,
    pub correct: usize,
    pub total: usize,
}

impl EvalMetrics {
    pub fn merge(self, other: EvalMetrics) -> EvalMetrics {
        EvalMetrics {
            loss_sum: self.loss_sum + other.loss_sum,
            correct: self.correct + other.correct,
            total: self.total + other.total,
        }
    }

    /// Mean per-sample loss; NaN when nothing was evaluated.
    pub fn mean_loss(&self) -> f64 {
        if self.total == 0 { f64::NAN } else { self.loss_sum / self.total as f64 }
    }

    /// Fraction in [0, 1]; 0 when nothing was evaluated.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 { 0.0 } else { self.correct as f64 / self.total as f64 }
    }
}

/// Opaque trainable model driven by the training worker.
///
/// Implementations are moved onto the worker thread, hence `Send`.
pub trait TrainableModel: Send {
    /// Training-mode forward pass. Implementations may cache whatever the
    /// following `backward_and_step` needs.
    fn forward(&mut self, batch: &Batch<'_>) -> Result<ForwardOutput, ModelError>;

    /// Backpropagates the loss of the last `forward` and updates parameters.
    fn backward_and_step(&mut self, output: &ForwardOutput) -> Result<(), ModelError>;

    /// Evaluation-mode pass: no parameter updates.
    fn evaluate(&mut self, batch: &Batch<'_>) -> Result<EvalMetrics, ModelError>;

    /// Predicted class for each input, in evaluation mode.
    fn predict(&mut self, inputs: &[&[f64]]) -> Result<Vec<usize>, ModelError>;

    /// Parameters in the checkpoint format (JSON).
    fn to_json(&self) -> Result<String, ModelError>;

    /// Current optimizer learning rate, if the model has one to schedule.
    fn learning_rate(&self) -> Option<f64> {
        None
    }

    fn set_learning_rate(&mut self, _lr: f64) {}
}

/// Builds a fresh model for each run from the run's seeded rng.
pub type ModelFactory = Arc<dyn Fn(&mut StdRng) -> Result<Box<dyn TrainableModel>, ModelError> + Send + Sync>;

/// Index of the maximum element in a slice.
pub fn argmax(v: &[f64]) -> usize {
    v.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}
