//! Process-level configuration shared by the `studio` and headless binaries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checkpoint::JsonDirStore;
use crate::data::dataset::DatasetSource;
use crate::data::{idx, synthetic};
use crate::error::{Result, TrainError};
use crate::model::{MlpClassifier, ModelFactory};
use crate::network::NetworkSpec;
use crate::optim::sgd::Sgd;
use crate::session::SessionController;
use crate::train::train_config::TrainConfig;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "FERRITE_CONFIG";
/// Environment variable overriding `bind_addr`.
pub const BIND_ENV: &str = "FERRITE_BIND";

/// Classes and feature count of the synthetic fallback dataset.
const BLOB_CLASSES: usize = 10;
const BLOB_FEATURES: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub bind_addr: String,
    /// Directory holding the MNIST IDX files.
    pub data_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub train: TrainConfig,
}

impl Default for StudioConfig {
    fn default() -> Self {
        StudioConfig {
            bind_addr: "127.0.0.1:7878".to_owned(),
            data_dir: PathBuf::from("data"),
            checkpoint_dir: PathBuf::from("trained_models"),
            train: TrainConfig::default(),
        }
    }
}

impl StudioConfig {
    /// Reads a config file; missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Resolves the config from an explicit path, then `FERRITE_CONFIG`,
    /// then defaults. `FERRITE_BIND` overrides the bind address in all cases.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(p) => {
                info!(path = %p.display(), "Loading config");
                StudioConfig::from_file(&p)?
            }
            None => StudioConfig::default(),
        };
        if let Ok(addr) = std::env::var(BIND_ENV) {
            config.bind_addr = addr;
        }
        config.train.validate()?;
        Ok(config)
    }

    /// MNIST from `data_dir` when all four files are present, otherwise
    /// Gaussian blobs sized to satisfy the configured quotas.
    pub fn load_source(&self) -> Result<DatasetSource> {
        if idx::mnist_available(&self.data_dir) {
            return idx::load_mnist(&self.data_dir);
        }
        warn!(dir = %self.data_dir.display(), "MNIST files not found; using synthetic blobs");
        let mut rng = match self.train.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let t = &self.train;
        let per_class = t.per_class_train.checked_add(t.per_class_val).ok_or_else(|| {
            TrainError::InvalidConfig("per_class_train + per_class_val overflows".to_owned())
        })?;
        synthetic::blob_source(
            per_class,
            (t.test_size + BLOB_CLASSES - 1) / BLOB_CLASSES,
            BLOB_CLASSES,
            BLOB_FEATURES,
            &mut rng,
        )
    }

    /// MLP classifier sized to `source`, one hidden layer per `hidden_layers` entry.
    pub fn model_factory(&self, source: &DatasetSource) -> ModelFactory {
        let t = &self.train;
        let spec = NetworkSpec::classifier(
            t.artifact_name.clone(),
            source.train.feature_count(),
            &t.hidden_layers,
            source.train.n_classes,
        )
        .with_hidden_activation(t.hidden_activation);
        let mut optimizer = Sgd::new(t.learning_rate).with_weight_decay(t.weight_decay);
        if let Some(max_norm) = t.clip_norm {
            optimizer = optimizer.with_clip_norm(max_norm);
        }
        MlpClassifier::factory(spec, optimizer)
    }

    /// Loads the dataset and wires a controller around it.
    pub fn build_controller(&self) -> Result<SessionController> {
        let source = Arc::new(self.load_source()?);
        let factory = self.model_factory(&source);
        let store = Arc::new(JsonDirStore::new(&self.checkpoint_dir));
        Ok(SessionController::new(source, factory, store, self.train.clone()))
    }
}
