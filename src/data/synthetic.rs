use rand::Rng;

use crate::data::dataset::{DatasetSource, LabeledDataset};
use crate::error::Result;

/// Gaussian blobs: `n_classes` centres on a circle in the first two
/// dimensions, padded with noise features up to `features`.
///
/// Used when no real dataset is on disk, and by tests.
pub fn blobs<R: Rng + ?Sized>(
    name: &str,
    per_class: usize,
    n_classes: usize,
    features: usize,
    rng: &mut R,
) -> Result<LabeledDataset> {
    let features = features.max(2);
    let mut inputs = Vec::with_capacity(per_class * n_classes);
    let mut labels = Vec::with_capacity(per_class * n_classes);

    for i in 0..per_class * n_classes {
        let class = i % n_classes;
        let angle = class as f64 * std::f64::consts::TAU / n_classes as f64;
        let (cx, cy) = (0.5 + 0.35 * angle.cos(), 0.5 + 0.35 * angle.sin());

        let mut row = Vec::with_capacity(features);
        row.push(cx + 0.05 * (rng.gen::<f64>() - 0.5));
        row.push(cy + 0.05 * (rng.gen::<f64>() - 0.5));
        row.extend((2..features).map(|_| 0.1 * rng.gen::<f64>()));

        inputs.push(row);
        labels.push(class);
    }

    LabeledDataset::new(name, inputs, labels, n_classes)
}

/// Blob training source plus a separate blob held-out pool.
pub fn blob_source<R: Rng + ?Sized>(
    per_class: usize,
    held_out_per_class: usize,
    n_classes: usize,
    features: usize,
    rng: &mut R,
) -> Result<DatasetSource> {
    let train = blobs("blobs-train", per_class, n_classes, features, rng)?;
    let held_out = blobs("blobs-test", held_out_per_class, n_classes, features, rng)?;
    DatasetSource::new(train, Some(held_out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn balanced_classes() {
        let mut rng = StdRng::seed_from_u64(3);
        let ds = blobs("b", 5, 4, 3, &mut rng).unwrap();
        assert_eq!(ds.len(), 20);
        assert_eq!(ds.feature_count(), 3);
        for c in 0..4 {
            assert_eq!(ds.labels.iter().filter(|&&l| l == c).count(), 5);
        }
    }
}
