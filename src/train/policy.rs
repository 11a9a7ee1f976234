//! Early-stopping decision made once per epoch from the validation loss.

use serde::{Deserialize, Serialize};

/// Best validation loss seen so far and the run of epochs without improvement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatienceTracker {
    pub best_validation_loss: f64,
    pub patience_counter: usize,
}

impl Default for PatienceTracker {
    fn default() -> Self {
        PatienceTracker {
            best_validation_loss: f64::INFINITY,
            patience_counter: 0,
        }
    }
}

/// Patience-based stopping with a minimum-epoch floor.
///
/// `max_epochs` is not part of the policy; the worker's loop bound enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoppingPolicy {
    pub patience_limit: usize,
    pub min_epochs: usize,
    pub min_delta: f64,
}

impl StoppingPolicy {
    /// Records `validation_loss` for `epoch` (1-based) and returns whether
    /// training should halt.
    ///
    /// An improvement (strictly below `best - min_delta`) updates the best
    /// value, resets the counter and never stops. Anything else, NaN
    /// included, bumps the counter; the run stops once the counter reaches
    /// `patience_limit` and `epoch >= min_epochs`.
    pub fn should_stop(&self, epoch: usize, validation_loss: f64, tracker: &mut PatienceTracker) -> bool {
        if validation_loss < tracker.best_validation_loss - self.min_delta {
            tracker.best_validation_loss = validation_loss;
            tracker.patience_counter = 0;
            return false;
        }
        tracker.patience_counter += 1;
        tracker.patience_counter >= self.patience_limit && epoch >= self.min_epochs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(patience_limit: usize, min_epochs: usize) -> StoppingPolicy {
        StoppingPolicy { patience_limit, min_epochs, min_delta: 0.0 }
    }

    fn decisions(p: &StoppingPolicy, losses: &[f64]) -> Vec<bool> {
        let mut tracker = PatienceTracker::default();
        losses.iter().enumerate()
            .map(|(i, &loss)| p.should_stop(i + 1, loss, &mut tracker))
            .collect()
    }

    #[test]
    fn stops_after_three_non_improvements() {
        let got = decisions(&policy(3, 2), &[0.5, 0.4, 0.45, 0.46, 0.47]);
        assert_eq!(got, vec![false, false, false, false, true]);
    }

    #[test]
    fn min_epochs_floor_delays_stop() {
        let got = decisions(&policy(2, 6), &[0.5, 0.6, 0.7, 0.8, 0.9, 1.0]);
        assert_eq!(got, vec![false, false, false, false, false, true]);
    }

    #[test]
    fn improvement_resets_patience() {
        let p = policy(2, 0);
        let mut t = PatienceTracker::default();
        assert!(!p.should_stop(1, 1.0, &mut t));
        assert!(!p.should_stop(2, 1.1, &mut t));
        assert!(!p.should_stop(3, 0.9, &mut t));
        assert_eq!(t.patience_counter, 0);
        assert_eq!(t.best_validation_loss, 0.9);
        assert!(!p.should_stop(4, 0.95, &mut t));
        assert!(p.should_stop(5, 0.95, &mut t));
    }

    #[test]
    fn equal_loss_is_not_an_improvement() {
        let p = policy(1, 0);
        let mut t = PatienceTracker::default();
        assert!(!p.should_stop(1, 0.5, &mut t));
        assert!(p.should_stop(2, 0.5, &mut t));
    }

    #[test]
    fn nan_counts_against_patience() {
        let p = policy(2, 0);
        let mut t = PatienceTracker::default();
        assert!(!p.should_stop(1, f64::NAN, &mut t));
        assert!(p.should_stop(2, f64::NAN, &mut t));
        assert!(t.best_validation_loss.is_infinite());
    }

    #[test]
    fn min_delta_requires_meaningful_drop() {
        let p = StoppingPolicy { patience_limit: 1, min_epochs: 0, min_delta: 0.1 };
        let mut t = PatienceTracker::default();
        assert!(!p.should_stop(1, 1.0, &mut t));
        assert!(p.should_stop(2, 0.95, &mut t));
    }
}
