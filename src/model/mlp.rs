use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;

use crate::error::ModelError;
use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::math::matrix::Matrix;
use crate::model::{argmax, Batch, EvalMetrics, ForwardOutput, ModelFactory, TrainableModel};
use crate::network::{Network, NetworkSpec};
use crate::optim::sgd::Sgd;

/// Dense softmax classifier trained with mini-batch SGD.
///
/// `forward` runs the per-sample forward and backward passes (the dense
/// layers only keep the activations of the last sample) and accumulates the
/// gradients; `backward_and_step` averages them and applies the update.
pub struct MlpClassifier {
    network: Network,
    optimizer: Sgd,
    pending: Option<PendingGrads>,
}

struct PendingGrads {
    grads: Vec<(Matrix, Matrix)>,
    samples: usize,
}

impl MlpClassifier {
    pub fn new<R: Rng + ?Sized>(spec: &NetworkSpec, optimizer: Sgd, rng: &mut R) -> Self {
        MlpClassifier {
            network: Network::from_spec(spec, rng),
            optimizer,
            pending: None,
        }
    }

    /// Factory producing a freshly initialised classifier for every run.
    pub fn factory(spec: NetworkSpec, optimizer: Sgd) -> ModelFactory {
        Arc::new(move |rng: &mut StdRng| {
            let model: Box<dyn TrainableModel> = Box::new(MlpClassifier::new(&spec, optimizer.clone(), rng));
            Ok(model)
        })
    }

    pub fn from_network(network: Network, optimizer: Sgd) -> Self {
        MlpClassifier { network, optimizer, pending: None }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    fn check_input(&self, input: &[f64]) -> Result<(), ModelError> {
        let expected = self.network.input_size();
        if input.len() != expected {
            return Err(ModelError::ShapeMismatch { expected, actual: input.len() });
        }
        Ok(())
    }

    fn zero_grads(&self) -> Vec<(Matrix, Matrix)> {
        self.network.layers.iter()
            .map(|layer| (
                Matrix::zeros(layer.weights.rows, layer.weights.cols),
                Matrix::zeros(layer.biases.rows, layer.biases.cols),
            ))
            .collect()
    }

    /// Forward + backward for one sample; adds its gradients into `acc`.
    fn accumulate_sample(&mut self, input: &[f64], target: usize, acc: &mut [(Matrix, Matrix)]) -> (f64, usize) {
        let output = self.network.forward(input);
        let loss = CrossEntropyLoss::loss(&output, target);
        let mut delta = Matrix::row(&CrossEntropyLoss::derivative(&output, target));

        for i in (0..self.network.layers.len()).rev() {
            let input_for_layer = if i == 0 {
                Matrix::row(input)
            } else {
                self.network.layers[i - 1].neurons.clone()
            };

            let (w_grad, b_grad) = self.network.layers[i].compute_gradients(&delta, &input_for_layer);

            if i > 0 {
                // Propagate δ_i through the weights to get ∂L/∂a_{i-1}.
                delta = b_grad.clone() * self.network.layers[i].weights.transpose();
            }

            acc[i].0.accumulate(&w_grad);
            acc[i].1.accumulate(&b_grad);
        }

        (loss, argmax(&output))
    }
}

impl TrainableModel for MlpClassifier {
    fn forward(&mut self, batch: &Batch<'_>) -> Result<ForwardOutput, ModelError> {
        if batch.is_empty() {
            return Err(ModelError::EmptyBatch);
        }

        let mut grads = self.zero_grads();
        let mut total_loss = 0.0;
        let mut predictions = Vec::with_capacity(batch.len());

        for (input, &label) in batch.inputs.iter().zip(batch.labels.iter()) {
            self.check_input(input)?;
            let (loss, predicted) = self.accumulate_sample(input, label, &mut grads);
            total_loss += loss;
            predictions.push(predicted);
        }

        self.pending = Some(PendingGrads { grads, samples: batch.len() });

        Ok(ForwardOutput {
            loss: total_loss / batch.len() as f64,
            predictions,
        })
    }

    fn backward_and_step(&mut self, _output: &ForwardOutput) -> Result<(), ModelError> {
        let pending = self.pending.take().ok_or(ModelError::NoPendingGradients)?;
        let inv_batch = 1.0 / pending.samples as f64;
        let averaged: Vec<(Matrix, Matrix)> = pending.grads.iter()
            .map(|(w, b)| (w.map(|x| x * inv_batch), b.map(|x| x * inv_batch)))
            .collect();
        self.optimizer.step(&mut self.network.layers, &averaged);
        Ok(())
    }

    fn evaluate(&mut self, batch: &Batch<'_>) -> Result<EvalMetrics, ModelError> {
        let mut metrics = EvalMetrics::default();
        for (input, &label) in batch.inputs.iter().zip(batch.labels.iter()) {
            self.check_input(input)?;
            let output = self.network.forward(input);
            metrics.loss_sum += CrossEntropyLoss::loss(&output, label);
            if argmax(&output) == label {
                metrics.correct += 1;
            }
            metrics.total += 1;
        }
        Ok(metrics)
    }

    fn predict(&mut self, inputs: &[&[f64]]) -> Result<Vec<usize>, ModelError> {
        inputs.iter()
            .map(|input| {
                self.check_input(input)?;
                Ok(argmax(&self.network.forward(input)))
            })
            .collect()
    }

    fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(&self.network)?)
    }

    fn learning_rate(&self) -> Option<f64> {
        Some(self.optimizer.learning_rate)
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.optimizer.learning_rate = lr;
    }
}
