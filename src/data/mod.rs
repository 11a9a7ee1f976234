pub mod dataset;
pub mod idx;
pub mod partition;
pub mod synthetic;

pub use dataset::{DatasetSource, LabeledDataset};
pub use partition::{partition, DatasetSplit, SplitQuota, TestPool};
