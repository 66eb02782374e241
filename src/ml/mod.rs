pub mod backend;
pub mod batcher;
pub mod dataset;
pub mod inference;
pub mod loader;
pub mod metrics;
pub mod ml_model;
pub mod training;
pub mod transform;

pub use batcher::{SampleBatch, SampleBatcher};
pub use dataset::{image_path, SampleDataset, SampleItem};
pub use inference::{InferenceEngine, Prediction};
pub use loader::{plan_batches, SampleLoader};
pub use metrics::{ConfusionCounts, EvaluationReport, MultiLabelConfusion, TagMetrics};
pub use ml_model::{GenreClassifier, ModelConfig};
pub use training::{evaluate, weighted_bce_with_logits, ClassWeights, EpochReport, Trainer, TrainingOutcome};
pub use transform::{ImageTransform, Normalization};
