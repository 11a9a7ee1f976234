use rand::seq::{index, SliceRandom};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::dataset::{DatasetSource, LabeledDataset};
use crate::error::{Result, TrainError};

/// Per-class quotas for a stratified split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitQuota {
    pub per_class_train: usize,
    pub per_class_val: usize,
    pub test_size: usize,
}

/// Which dataset the test indices point into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPool {
    /// The separate held-out dataset.
    HeldOut,
    /// The source dataset, restricted to samples not used for train/validation.
    Remainder,
}

/// Three disjoint index sets over a labeled source.
///
/// `train` and `validation` index into the source dataset; `test` indexes
/// into the dataset named by `test_pool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSplit {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
    pub test_pool: TestPool,
}

impl DatasetSplit {
    /// The dataset `test` indexes into.
    pub fn test_set<'a>(&self, source: &'a DatasetSource) -> &'a LabeledDataset {
        match (self.test_pool, source.held_out.as_ref()) {
            (TestPool::HeldOut, Some(held_out)) => held_out,
            _ => &source.train,
        }
    }
}

/// Stratified split of `source.train` into train / validation subsets, plus a
/// uniformly drawn test subset.
///
/// For each class the shuffled members contribute exactly `per_class_train`
/// train indices and the next `per_class_val` validation indices. The pooled
/// lists are then shuffled again so batches are class-balanced in
/// expectation rather than in strict rotation. Test indices are drawn
/// without replacement from `source.held_out` when present, otherwise from
/// the source samples left over after train/validation.
pub fn partition<R: Rng + ?Sized>(source: &DatasetSource, quota: &SplitQuota, rng: &mut R) -> Result<DatasetSplit> {
    let dataset = &source.train;
    let required = quota.per_class_train.saturating_add(quota.per_class_val);

    let mut by_label: Vec<Vec<usize>> = vec![Vec::new(); dataset.n_classes];
    for (idx, &label) in dataset.labels.iter().enumerate() {
        by_label[label].push(idx);
    }

    // Quotas are only trusted after every class has been checked against them.
    if let Some((label, members)) = by_label.iter().enumerate().find(|(_, m)| m.len() < required) {
        return Err(TrainError::InsufficientSamples { label, available: members.len(), required });
    }

    let mut train = Vec::new();
    let mut validation = Vec::new();
    let mut used = vec![false; dataset.len()];

    for members in by_label.iter_mut() {
        members.shuffle(rng);
        let (t, rest) = members.split_at(quota.per_class_train);
        let v = &rest[..quota.per_class_val];
        for &i in t.iter().chain(v) {
            used[i] = true;
        }
        train.extend_from_slice(t);
        validation.extend_from_slice(v);
    }

    train.shuffle(rng);
    validation.shuffle(rng);

    let (test, test_pool) = match &source.held_out {
        Some(held_out) => (draw(held_out.len(), quota.test_size, rng)?, TestPool::HeldOut),
        None => {
            let remainder: Vec<usize> = (0..dataset.len()).filter(|&i| !used[i]).collect();
            let picks = draw(remainder.len(), quota.test_size, rng)?;
            (picks.into_iter().map(|p| remainder[p]).collect(), TestPool::Remainder)
        }
    };

    debug!(
        train = train.len(),
        validation = validation.len(),
        test = test.len(),
        pool = ?test_pool,
        "Partitioned dataset"
    );

    Ok(DatasetSplit { train, validation, test, test_pool })
}

fn draw<R: Rng + ?Sized>(available: usize, requested: usize, rng: &mut R) -> Result<Vec<usize>> {
    if requested > available {
        return Err(TrainError::TestPoolTooSmall { available, requested });
    }
    Ok(index::sample(rng, available, requested).into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashSet;

    fn source(per_class: &[usize], held_out: Option<usize>) -> DatasetSource {
        let mut inputs = Vec::new();
        let mut labels = Vec::new();
        for (class, &n) in per_class.iter().enumerate() {
            for _ in 0..n {
                inputs.push(vec![class as f64]);
                labels.push(class);
            }
        }
        let train = LabeledDataset::new("src", inputs, labels, per_class.len()).unwrap();
        let held = held_out.map(|n| {
            LabeledDataset::new("held", vec![vec![0.0]; n], vec![0; n], per_class.len()).unwrap()
        });
        DatasetSource::new(train, held).unwrap()
    }

    fn quota(t: usize, v: usize, test: usize) -> SplitQuota {
        SplitQuota { per_class_train: t, per_class_val: v, test_size: test }
    }

    #[test]
    fn exact_per_class_counts_and_disjoint_sets() {
        let src = source(&[30, 25, 40], None);
        let mut rng = StdRng::seed_from_u64(11);
        let split = partition(&src, &quota(10, 5, 20), &mut rng).unwrap();

        for class in 0..3 {
            let t = split.train.iter().filter(|&&i| src.train.labels[i] == class).count();
            let v = split.validation.iter().filter(|&&i| src.train.labels[i] == class).count();
            assert_eq!((t, v), (10, 5));
        }

        let train: HashSet<_> = split.train.iter().collect();
        let val: HashSet<_> = split.validation.iter().collect();
        let test: HashSet<_> = split.test.iter().collect();
        assert_eq!(train.len(), 30);
        assert_eq!(val.len(), 15);
        assert_eq!(test.len(), 20);
        assert!(train.is_disjoint(&val));
        assert!(train.is_disjoint(&test));
        assert!(val.is_disjoint(&test));
        assert_eq!(split.test_pool, TestPool::Remainder);
    }

    #[test]
    fn held_out_pool_is_used_when_present() {
        let src = source(&[6, 6], Some(50));
        let mut rng = StdRng::seed_from_u64(2);
        let split = partition(&src, &quota(4, 2, 10), &mut rng).unwrap();
        assert_eq!(split.test_pool, TestPool::HeldOut);
        assert_eq!(split.test.len(), 10);
        assert!(split.test.iter().all(|&i| i < 50));
        assert_eq!(split.test_set(&src).name, "held");
    }

    #[test]
    fn insufficient_class_fails_fast() {
        let src = source(&[12, 5], None);
        let mut rng = StdRng::seed_from_u64(0);
        let err = partition(&src, &quota(4, 2, 0), &mut rng).unwrap_err();
        assert!(matches!(err, TrainError::InsufficientSamples { label: 1, available: 5, required: 6 }));
    }

    #[test]
    fn oversized_quota_is_rejected_without_reserving() {
        let src = source(&[12, 12], None);
        let mut rng = StdRng::seed_from_u64(0);
        let err = partition(&src, &quota(1 << 40, 2, 0), &mut rng).unwrap_err();
        assert!(matches!(err, TrainError::InsufficientSamples { label: 0, available: 12, .. }));

        let err = partition(&src, &quota(usize::MAX, usize::MAX, 0), &mut rng).unwrap_err();
        assert!(matches!(err, TrainError::InsufficientSamples { required: usize::MAX, .. }));
    }

    #[test]
    fn test_pool_too_small() {
        let src = source(&[6, 6], None);
        let mut rng = StdRng::seed_from_u64(0);
        let err = partition(&src, &quota(3, 2, 5), &mut rng).unwrap_err();
        assert!(matches!(err, TrainError::TestPoolTooSmall { available: 2, requested: 5 }));
    }

    #[test]
    fn same_seed_same_split() {
        let src = source(&[20, 20], Some(30));
        let a = partition(&src, &quota(8, 4, 10), &mut StdRng::seed_from_u64(42)).unwrap();
        let b = partition(&src, &quota(8, 4, 10), &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
    }
}
