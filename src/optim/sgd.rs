use crate::{math::matrix::Matrix, layers::dense::Layer};

/// Mini-batch SGD with an optional global gradient-norm clip and L2 weight
/// decay. Decay is added after clipping and never touches the biases.
#[derive(Debug, Clone)]
pub struct Sgd {
    pub learning_rate: f64,
    pub clip_norm: Option<f64>,
    pub weight_decay: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Sgd {
        Sgd { learning_rate, clip_norm: None, weight_decay: 0.0 }
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Sgd {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_clip_norm(mut self, max_norm: f64) -> Sgd {
        self.clip_norm = Some(max_norm);
        self
    }

    /// Applies one SGD update to every layer given batch-averaged gradients.
    pub fn step(&self, layers: &mut [Layer], grads: &[(Matrix, Matrix)]) {
        let scale = match self.clip_norm {
            Some(max_norm) => {
                let norm = global_norm(grads);
                if norm > max_norm { max_norm / norm } else { 1.0 }
            }
            None => 1.0,
        };
        let lr = self.learning_rate * scale;
        // w - lr * (s*g + wd*w) == w * (1 - lr*wd) - lr*s * g
        let shrink = 1.0 - self.learning_rate * self.weight_decay;
        for (layer, (w_grad, b_grad)) in layers.iter_mut().zip(grads.iter()) {
            if self.weight_decay > 0.0 {
                layer.weights = layer.weights.map(|w| w * shrink);
            }
            layer.apply_gradients(w_grad, b_grad, lr);
        }
    }
}

fn global_norm(grads: &[(Matrix, Matrix)]) -> f64 {
    grads.iter()
        .flat_map(|(w, b)| w.data.iter().chain(b.data.iter()))
        .flat_map(|row| row.iter())
        .map(|x| x * x)
        .sum::<f64>()
        .sqrt()
}
