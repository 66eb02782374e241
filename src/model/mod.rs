pub mod config;
pub mod inference_config;
pub mod model_metadata;
pub mod model_storage;

pub use config::{AppConfig, DataSettings, DeviceType, ModelSettings, TrainingSettings};
pub use inference_config::InferenceConfig;
pub use model_metadata::{EpochSummary, ModelMetadata};
pub use model_storage::{
    load_metadata, load_model_with_metadata, load_trained_model, print_metadata_info, save_model_with_metadata,
    save_trained_model,
};
