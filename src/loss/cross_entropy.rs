/// Categorical cross-entropy loss for use with a Softmax output layer.
pub struct CrossEntropyLoss;

/// Small epsilon added inside log() to prevent log(0) = -inf.
const EPS: f64 = 1e-12;

impl CrossEntropyLoss {
    /// `L = -ln(predicted[target] + eps)` for a class-index target.
    pub fn loss(predicted: &[f64], target: usize) -> f64 {
        -(predicted.get(target).copied().unwrap_or(0.0) + EPS).ln()
    }

    /// Gradient of the combined Softmax + cross-entropy w.r.t. the logits:
    /// `∂L/∂z_i = predicted[i] - 1{i == target}`.
    pub fn derivative(predicted: &[f64], target: usize) -> Vec<f64> {
        predicted.iter().enumerate()
            .map(|(i, p)| if i == target { p - 1.0 } else { *p })
            .collect()
    }
}
