use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::layers::dense::Layer;
use crate::network::spec::NetworkSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub spec: NetworkSpec,
    pub layers: Vec<Layer>,
}

impl Network {
    /// Builds a freshly initialised network from an architecture spec.
    pub fn from_spec<R: Rng + ?Sized>(spec: &NetworkSpec, rng: &mut R) -> Network {
        let layers = spec.layers.iter()
            .map(|l| Layer::new(l.size, l.input_size, l.activation, rng))
            .collect();
        Network { spec: spec.clone(), layers }
    }

    /// Forward pass; stores activations in each layer for backprop.
    pub fn forward(&mut self, input: &[f64]) -> Vec<f64> {
        let mut current = input.to_vec();
        for layer in &mut self.layers {
            current = layer.feed_from(&current);
        }
        current
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map(|l| l.input_size()).unwrap_or(0)
    }
}
