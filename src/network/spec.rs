use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;

/// Describes one dense layer.
///
/// - `size`       — number of neurons in this layer
/// - `input_size` — output size of the previous layer, or the raw input
///                  dimension for the first layer
/// - `activation` — applied after the linear transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub size: usize,
    pub input_size: usize,
    pub activation: ActivationFunction,
}

/// Serializable architecture description, kept apart from trained weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Human-readable name.
    pub name: String,
    /// Ordered layers (input → output).
    pub layers: Vec<LayerSpec>,
}

impl NetworkSpec {
    /// ReLU hidden layers followed by a Softmax output over `n_classes`.
    pub fn classifier(name: impl Into<String>, input_size: usize, hidden: &[usize], n_classes: usize) -> Self {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut fan_in = input_size;
        for &size in hidden {
            layers.push(LayerSpec { size, input_size: fan_in, activation: ActivationFunction::ReLU });
            fan_in = size;
        }
        layers.push(LayerSpec { size: n_classes, input_size: fan_in, activation: ActivationFunction::Softmax });
        NetworkSpec { name: name.into(), layers }
    }

    /// Replaces the activation of every hidden layer; the output stays Softmax.
    pub fn with_hidden_activation(mut self, activation: ActivationFunction) -> Self {
        let hidden = self.layers.len().saturating_sub(1);
        for layer in &mut self.layers[..hidden] {
            layer.activation = activation;
        }
        self
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_chains_fan_in() {
        let spec = NetworkSpec::classifier("mlp", 784, &[128, 64], 10);
        assert_eq!(spec.layers.len(), 3);
        assert_eq!(spec.layers[1].input_size, 128);
        assert_eq!(spec.layers[2].input_size, 64);
        assert_eq!(spec.layers[2].activation, ActivationFunction::Softmax);
        assert_eq!(spec.layers[0].input_size, 784);
        assert_eq!(spec.layers[2].size, 10);
    }

    #[test]
    fn hidden_activation_leaves_output_alone() {
        let spec = NetworkSpec::classifier("mlp", 4, &[8, 8], 3)
            .with_hidden_activation(ActivationFunction::Tanh);
        assert_eq!(spec.layers[0].activation, ActivationFunction::Tanh);
        assert_eq!(spec.layers[1].activation, ActivationFunction::Tanh);
        assert_eq!(spec.layers[2].activation, ActivationFunction::Softmax);
    }
}
