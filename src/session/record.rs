use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::train::policy::PatienceTracker;

/// Lifecycle of the single training session.
///
/// `Idle → Running → {Completed, Failed}` or `Running → Stopping → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
    Completed,
    Failed,
}

impl SessionState {
    /// `Running` and `Stopping` own a worker.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Running | SessionState::Stopping)
    }
}

/// Test-sample inference kept from the last completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePredictions {
    pub images: Vec<Vec<f64>>,
    pub predictions: Vec<usize>,
    pub true_labels: Vec<usize>,
    pub image_shape: Option<(u32, u32)>,
}

/// The single global run record.
///
/// The worker owns the numeric fields while `Running`; the controller owns
/// `state`, `run_id` and the reset on `start`.
#[derive(Debug, Clone)]
pub struct TrainingSession {
    pub state: SessionState,
    /// Bumped on every start; workers only write while their id is current.
    pub run_id: u64,
    pub current_epoch: usize,
    pub loss_history: Vec<f64>,
    pub accuracy_history: Vec<f64>,
    pub val_loss_history: Vec<f64>,
    pub val_accuracy_history: Vec<f64>,
    pub patience: PatienceTracker,
    pub error_message: Option<String>,
    pub artifact_path: Option<PathBuf>,
    pub sample: Option<SamplePredictions>,
    pub started_at: Option<Instant>,
    pub elapsed_ms: Option<u64>,
}

impl Default for TrainingSession {
    fn default() -> Self {
        TrainingSession {
            state: SessionState::Idle,
            run_id: 0,
            current_epoch: 0,
            loss_history: Vec::new(),
            accuracy_history: Vec::new(),
            val_loss_history: Vec::new(),
            val_accuracy_history: Vec::new(),
            patience: PatienceTracker::default(),
            error_message: None,
            artifact_path: None,
            sample: None,
            started_at: None,
            elapsed_ms: None,
        }
    }
}

impl TrainingSession {
    /// Clears every per-run field and enters `Running` under a new run id.
    pub fn reset_for_run(&mut self) -> u64 {
        let run_id = self.run_id + 1;
        *self = TrainingSession {
            state: SessionState::Running,
            run_id,
            started_at: Some(Instant::now()),
            ..TrainingSession::default()
        };
        run_id
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            loss: self.loss_history.clone(),
            accuracy: self.accuracy_history.clone(),
            val_loss: self.val_loss_history.clone(),
            val_accuracy: self.val_accuracy_history.clone(),
            current_epoch: self.current_epoch,
            is_training: self.state.is_active(),
            is_completed: self.state == SessionState::Completed,
            state: self.state,
            error_message: self.error_message.clone(),
            best_validation_loss: Some(self.patience.best_validation_loss).filter(|v| v.is_finite()),
            patience_counter: self.patience.patience_counter,
            artifact_path: self.artifact_path.as_ref().map(|p| p.display().to_string()),
            elapsed_ms: self.elapsed_ms
                .or_else(|| self.started_at.map(|t| t.elapsed().as_millis() as u64)),
        }
    }
}

/// Point-in-time copy of the session served by `get_metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub loss: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,
    pub current_epoch: usize,
    pub is_training: bool,
    pub is_completed: bool,
    pub state: SessionState,
    pub error_message: Option<String>,
    pub best_validation_loss: Option<f64>,
    pub patience_counter: usize,
    pub artifact_path: Option<String>,
    pub elapsed_ms: Option<u64>,
}

/// Shared session record.
pub type SharedSession = Arc<Mutex<TrainingSession>>;

pub(crate) fn lock_session(session: &SharedSession) -> MutexGuard<'_, TrainingSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Worker-side view of the session, bound to one run id.
///
/// Every write is skipped once the controller has moved on to a newer run,
/// so a detached worker can never touch a fresh session.
#[derive(Clone)]
pub struct SessionHandle {
    session: SharedSession,
    run_id: u64,
}

impl SessionHandle {
    pub fn new(session: SharedSession, run_id: u64) -> Self {
        SessionHandle { session, run_id }
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Runs `f` on the record if this run is still current.
    pub fn update<T>(&self, f: impl FnOnce(&mut TrainingSession) -> T) -> Option<T> {
        let mut session = lock_session(&self.session);
        if session.run_id != self.run_id {
            return None;
        }
        Some(f(&mut session))
    }

    pub fn begin_epoch(&self, epoch: usize) {
        self.update(|s| s.current_epoch = epoch);
    }

    pub fn record_epoch(&self, loss: f64, accuracy: f64, val_loss: f64, val_accuracy: f64) {
        self.update(|s| {
            if s.state == SessionState::Running {
                s.loss_history.push(loss);
                s.accuracy_history.push(accuracy);
                s.val_loss_history.push(val_loss);
                s.val_accuracy_history.push(val_accuracy);
            }
        });
    }

    /// Moves `Running → Completed`. A session already in `Stopping` is left
    /// for the controller.
    pub fn complete(&self, artifact_path: PathBuf, sample: SamplePredictions) -> bool {
        self.update(|s| {
            if s.state != SessionState::Running {
                return false;
            }
            s.state = SessionState::Completed;
            s.artifact_path = Some(artifact_path);
            s.sample = Some(sample);
            s.elapsed_ms = s.started_at.map(|t| t.elapsed().as_millis() as u64);
            true
        })
        .unwrap_or(false)
    }

    /// Moves `Running → Failed` and records the message. A run that is
    /// being stopped ends in `Idle` instead.
    pub fn fail(&self, message: &str) -> bool {
        self.update(|s| {
            if s.state != SessionState::Running {
                return false;
            }
            s.state = SessionState::Failed;
            s.error_message = Some(message.to_owned());
            s.elapsed_ms = s.started_at.map(|t| t.elapsed().as_millis() as u64);
            true
        })
        .unwrap_or(false)
    }
}
