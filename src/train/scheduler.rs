//! Learning-rate reduction when validation loss plateaus.

use serde::{Deserialize, Serialize};

/// Smallest change worth applying; smaller reductions are skipped.
const MIN_STEP: f64 = 1e-8;

/// Multiplies the learning rate by `factor` once validation loss has failed
/// to improve for more than `patience` consecutive epochs, then starts
/// counting again. The rate never drops below `min_lr`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateauScheduler {
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
    best: f64,
    bad_epochs: usize,
}

impl PlateauScheduler {
    pub fn new(factor: f64, patience: usize, min_lr: f64) -> Self {
        PlateauScheduler { factor, patience, min_lr, best: f64::INFINITY, bad_epochs: 0 }
    }

    /// Records one epoch's validation loss. Returns the new learning rate
    /// when `lr` should change.
    pub fn step(&mut self, validation_loss: f64, lr: f64) -> Option<f64> {
        if validation_loss < self.best {
            self.best = validation_loss;
            self.bad_epochs = 0;
            return None;
        }
        self.bad_epochs += 1;
        if self.bad_epochs <= self.patience {
            return None;
        }
        self.bad_epochs = 0;
        let reduced = (lr * self.factor).max(self.min_lr);
        if lr - reduced > MIN_STEP { Some(reduced) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates(s: &mut PlateauScheduler, mut lr: f64, losses: &[f64]) -> Vec<f64> {
        losses.iter()
            .map(|&loss| {
                if let Some(new_lr) = s.step(loss, lr) {
                    lr = new_lr;
                }
                lr
            })
            .collect()
    }

    #[test]
    fn halves_after_patience_is_exceeded() {
        let mut s = PlateauScheduler::new(0.5, 2, 0.0);
        let lrs = rates(&mut s, 1.0, &[1.0, 1.1, 1.2, 1.3, 1.4, 1.5, 1.6]);
        assert_eq!(lrs, vec![1.0, 1.0, 1.0, 0.5, 0.5, 0.5, 0.25]);
    }

    #[test]
    fn improvement_resets_the_count() {
        let mut s = PlateauScheduler::new(0.5, 1, 0.0);
        let lrs = rates(&mut s, 0.1, &[1.0, 1.1, 0.9, 1.0, 0.8]);
        assert_eq!(lrs, vec![0.1; 5]);
    }

    #[test]
    fn floor_is_respected() {
        let mut s = PlateauScheduler::new(0.1, 0, 0.05);
        let lrs = rates(&mut s, 0.2, &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(lrs, vec![0.2, 0.05, 0.05, 0.05]);
    }

    #[test]
    fn nan_counts_as_no_improvement() {
        let mut s = PlateauScheduler::new(0.5, 0, 0.0);
        assert_eq!(s.step(f64::NAN, 1.0), Some(0.5));
    }
}
