use serde::{Serialize, Deserialize};

/// Activation applied after a dense layer's linear transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationFunction {
    #[serde(rename = "relu")]
    ReLU,
    Sigmoid,
    Tanh,
    Identity,
    /// Vector-valued; applied over the whole row by `ActivationFunction::apply`.
    Softmax,
}

impl ActivationFunction {
    /// Applies the activation to a full pre-activation row.
    pub fn apply(&self, z: &[f64]) -> Vec<f64> {
        match self {
            ActivationFunction::Softmax => softmax(z),
            _ => z.iter().map(|&x| self.function(x)).collect(),
        }
    }

    /// Element-wise activation. `Softmax` is treated as identity here; callers
    /// that need the probabilities go through `apply`.
    pub fn function(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::ReLU => if x > 0.0 { x } else { 0.0 },
            ActivationFunction::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ActivationFunction::Tanh => x.tanh(),
            ActivationFunction::Identity | ActivationFunction::Softmax => x,
        }
    }

    /// Element-wise derivative at the pre-activation `x`.
    ///
    /// `Softmax` returns 1.0: it is always paired with cross-entropy, whose
    /// gradient (`predicted - expected`) is already taken w.r.t. the logits.
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationFunction::Sigmoid => {
                let fx = self.function(x);
                fx * (1.0 - fx)
            }
            ActivationFunction::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            ActivationFunction::Identity | ActivationFunction::Softmax => 1.0,
        }
    }
}

/// Numerically stable softmax (max-shifted).
fn softmax(z: &[f64]) -> Vec<f64> {
    let max = z.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = z.iter().map(|&x| (x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
