pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod optim;
pub mod model;
pub mod data;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod train;
pub mod session;

// Convenience re-exports
pub use math::matrix::Matrix;
pub use activation::activation::ActivationFunction;
pub use layers::dense::Layer;
pub use network::{Network, NetworkSpec};
pub use optim::sgd::Sgd;
pub use model::{MlpClassifier, ModelFactory, TrainableModel};
pub use data::{DatasetSource, LabeledDataset};
pub use checkpoint::{CheckpointStore, JsonDirStore};
pub use config::StudioConfig;
pub use error::{ModelError, Result, TrainError};
pub use train::{ProgressEvent, TrainConfig};
pub use session::{SessionController, SessionState, StartStatus, StopStatus};
