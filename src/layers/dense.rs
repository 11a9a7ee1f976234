use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::{math::matrix::Matrix, activation::activation::ActivationFunction};

/// Fully connected layer. Weights are stored as `input_size × size`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub size: usize,
    pub weights: Matrix,
    pub biases: Matrix,
    pub activator: ActivationFunction,
    /// Activations of the last forward pass.
    #[serde(skip)]
    pub neurons: Matrix,
    /// Pre-activation values (z = xW + b) needed for the derivative.
    #[serde(skip)]
    pre_neurons: Matrix,
}

impl Layer {
    pub fn new<R: Rng + ?Sized>(
        size: usize,
        input_size: usize,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> Layer {
        let weights = match activation {
            ActivationFunction::ReLU => Matrix::he(input_size, size, rng),
            _ => Matrix::xavier(input_size, size, rng),
        };

        Layer {
            size,
            weights,
            biases: Matrix::zeros(1, size),
            activator: activation,
            neurons: Matrix::zeros(1, size),
            pre_neurons: Matrix::zeros(1, size),
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.rows
    }

    pub fn feed_from(&mut self, input: &[f64]) -> Vec<f64> {
        let z = Matrix::row(input) * self.weights.clone() + self.biases.clone();
        let a = self.activator.apply(&z.data[0]);
        self.pre_neurons = z;
        self.neurons = Matrix::row(&a);
        a
    }

    /// Computes gradient adjustments. Returns (weights_grad, biases_grad).
    /// `next_layer_delta` is ∂L/∂a for this layer (error in activation space).
    pub fn compute_gradients(&self, next_layer_delta: &Matrix, inputs: &Matrix) -> (Matrix, Matrix) {
        let act_derivative = self.pre_neurons.map(|x| self.activator.derivative(x));
        // δ = error ⊙ σ'(z)
        let layer_delta = next_layer_delta.hadamard(&act_derivative);
        let weights_adjustment = inputs.transpose() * layer_delta.clone();
        (weights_adjustment, layer_delta)
    }

    /// Applies pre-computed gradients scaled by lr.
    pub fn apply_gradients(&mut self, weights_grad: &Matrix, biases_grad: &Matrix, lr: f64) {
        self.weights = self.weights.clone() - weights_grad.map(|x| x * lr);
        self.biases = self.biases.clone() - biases_grad.map(|x| x * lr);
    }
}
