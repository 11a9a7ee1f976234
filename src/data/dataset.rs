use crate::error::{Result, TrainError};
use crate::model::Batch;

/// In-memory labeled dataset: one feature vector and one class index per sample.
#[derive(Debug, Clone)]
pub struct LabeledDataset {
    /// Short name used in logs (e.g. "mnist-train", "blobs").
    pub name: String,
    pub inputs: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
    pub n_classes: usize,
    /// `(width, height)` when every sample is a flattened grayscale image.
    pub image_shape: Option<(u32, u32)>,
}

impl LabeledDataset {
    /// Validates lengths, feature counts and label range.
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<Vec<f64>>,
        labels: Vec<usize>,
        n_classes: usize,
    ) -> Result<Self> {
        let name = name.into();
        if inputs.len() != labels.len() {
            return Err(TrainError::Dataset(format!(
                "{}: {} inputs but {} labels", name, inputs.len(), labels.len()
            )));
        }
        if let Some(first) = inputs.first() {
            let width = first.len();
            if let Some(i) = inputs.iter().position(|row| row.len() != width) {
                return Err(TrainError::Dataset(format!(
                    "{}: sample {} has {} features, expected {}", name, i, inputs[i].len(), width
                )));
            }
        }
        if let Some((i, &label)) = labels.iter().enumerate().find(|(_, &l)| l >= n_classes) {
            return Err(TrainError::Dataset(format!(
                "{}: label {} at index {} is out of range for {} classes", name, label, i, n_classes
            )));
        }
        Ok(LabeledDataset { name, inputs, labels, n_classes, image_shape: None })
    }

    pub fn with_image_shape(mut self, width: u32, height: u32) -> Self {
        self.image_shape = Some((width, height));
        self
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn feature_count(&self) -> usize {
        self.inputs.first().map(|r| r.len()).unwrap_or(0)
    }

    /// Borrows the samples at `indices` as a batch.
    pub fn batch(&self, indices: &[usize]) -> Batch<'_> {
        Batch {
            inputs: indices.iter().map(|&i| self.inputs[i].as_slice()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

/// The source a session partitions from, plus an optional held-out pool
/// the test subset is drawn from.
#[derive(Debug, Clone)]
pub struct DatasetSource {
    pub train: LabeledDataset,
    pub held_out: Option<LabeledDataset>,
}

impl DatasetSource {
    pub fn new(train: LabeledDataset, held_out: Option<LabeledDataset>) -> Result<Self> {
        if let Some(h) = &held_out {
            if !h.is_empty() && !train.is_empty() && h.feature_count() != train.feature_count() {
                return Err(TrainError::Dataset(format!(
                    "held-out set has {} features, training set has {}",
                    h.feature_count(), train.feature_count()
                )));
            }
        }
        Ok(DatasetSource { train, held_out })
    }
}
