use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::activation::ActivationFunction;
use crate::data::partition::SplitQuota;
use crate::error::{Result, TrainError};
use crate::train::policy::StoppingPolicy;
use crate::train::scheduler::PlateauScheduler;

/// Upper bound on every split quota; larger values cannot describe a real dataset.
pub const MAX_QUOTA: usize = 10_000_000;

/// Configuration for one training session.
///
/// Every field has a default, so a partial JSON object is a valid config.
///
/// # Fields
/// - `max_epochs`       — hard ceiling on epochs, enforced by the worker loop
/// - `min_epochs`       — the stopping policy never fires before this epoch
/// - `patience`         — consecutive non-improving epochs tolerated
/// - `min_delta`        — improvement must exceed this to reset patience
/// - `batch_size`       — samples per mini-batch
/// - `learning_rate` / `weight_decay` / `clip_norm` — SGD settings
/// - `lr_factor` / `lr_patience` / `min_learning_rate` — plateau schedule:
///   the rate is multiplied by `lr_factor` once validation loss has not
///   improved for more than `lr_patience` epochs; `lr_factor = 1` disables it
/// - `hidden_layers` / `hidden_activation` — MLP shape
/// - `per_class_train` / `per_class_val` / `test_size` — split quotas
/// - `sample_size`      — test samples reported in `training_complete`
/// - `channel_capacity` — progress events buffered for a slow observer
/// - `join_timeout_ms`  — how long `stop()` waits for the worker
/// - `seed`             — fixes the split, batch order and initial weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub max_epochs: usize,
    pub min_epochs: usize,
    pub patience: usize,
    pub min_delta: f64,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub lr_factor: f64,
    pub lr_patience: usize,
    pub min_learning_rate: f64,
    pub clip_norm: Option<f64>,
    pub hidden_layers: Vec<usize>,
    pub hidden_activation: ActivationFunction,
    pub per_class_train: usize,
    pub per_class_val: usize,
    pub test_size: usize,
    pub sample_size: usize,
    pub channel_capacity: usize,
    pub join_timeout_ms: u64,
    pub seed: Option<u64>,
    /// Checkpoint name the trained model is stored under.
    pub artifact_name: String,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            max_epochs: 30,
            min_epochs: 10,
            patience: 7,
            min_delta: 0.0,
            batch_size: 32,
            learning_rate: 0.01,
            weight_decay: 1e-5,
            lr_factor: 0.5,
            lr_patience: 2,
            min_learning_rate: 0.0,
            clip_norm: Some(1.0),
            hidden_layers: vec![128],
            hidden_activation: ActivationFunction::ReLU,
            per_class_train: 800,
            per_class_val: 100,
            test_size: 1000,
            sample_size: 10,
            channel_capacity: 256,
            join_timeout_ms: 5000,
            seed: None,
            artifact_name: "mnist_mlp".to_owned(),
        }
    }
}

impl TrainConfig {
    /// Rejects configurations the worker cannot run.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(TrainError::InvalidConfig(msg.to_owned()));
        if self.max_epochs == 0 {
            return fail("max_epochs must be at least 1");
        }
        if self.min_epochs > self.max_epochs {
            return fail("min_epochs must not exceed max_epochs");
        }
        if self.batch_size == 0 {
            return fail("batch_size must be at least 1");
        }
        if self.per_class_train == 0 || self.per_class_val == 0 {
            return fail("per_class_train and per_class_val must be at least 1");
        }
        if self.per_class_train > MAX_QUOTA || self.per_class_val > MAX_QUOTA || self.test_size > MAX_QUOTA {
            return Err(TrainError::InvalidConfig(format!("split quotas must not exceed {}", MAX_QUOTA)));
        }
        if self.sample_size > self.test_size {
            return fail("sample_size must not exceed test_size");
        }
        if self.channel_capacity == 0 {
            return fail("channel_capacity must be at least 1");
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return fail("learning_rate must be a positive finite number");
        }
        if !(self.weight_decay >= 0.0 && self.weight_decay.is_finite()) {
            return fail("weight_decay must be a non-negative finite number");
        }
        if !(self.lr_factor > 0.0 && self.lr_factor <= 1.0) {
            return fail("lr_factor must be in (0, 1]");
        }
        if !(self.min_learning_rate >= 0.0 && self.min_learning_rate <= self.learning_rate) {
            return fail("min_learning_rate must be between 0 and learning_rate");
        }
        if self.hidden_activation == ActivationFunction::Softmax {
            return fail("hidden_activation cannot be softmax");
        }
        if !(self.min_delta >= 0.0) {
            return fail("min_delta must be non-negative");
        }
        if self.artifact_name.is_empty()
            || self.artifact_name.contains(['/', '\\'])
            || self.artifact_name.contains("..")
        {
            return fail("artifact_name must be a plain file stem");
        }
        Ok(())
    }

    pub fn quota(&self) -> SplitQuota {
        SplitQuota {
            per_class_train: self.per_class_train,
            per_class_val: self.per_class_val,
            test_size: self.test_size,
        }
    }

    pub fn policy(&self) -> StoppingPolicy {
        StoppingPolicy {
            patience_limit: self.patience,
            min_epochs: self.min_epochs,
            min_delta: self.min_delta,
        }
    }

    pub fn scheduler(&self) -> PlateauScheduler {
        PlateauScheduler::new(self.lr_factor, self.lr_patience, self.min_learning_rate)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}
