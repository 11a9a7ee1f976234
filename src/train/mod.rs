pub mod policy;
pub mod progress;
pub mod scheduler;
pub mod train_config;
pub mod worker;

pub use policy::{PatienceTracker, StoppingPolicy};
pub use progress::{ProgressChannel, ProgressEvent, Recv, Subscription};
pub use scheduler::PlateauScheduler;
pub use train_config::TrainConfig;
pub use worker::{CancelToken, TerminalOutcome, TrainingWorker};
