//! The single global training session: its record and the controller that
//! owns its state machine.

pub mod controller;
pub mod record;

pub use controller::{SessionController, StartStatus, StopStatus};
pub use record::{MetricsSnapshot, SamplePredictions, SessionState, TrainingSession};
