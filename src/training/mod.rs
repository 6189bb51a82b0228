pub mod artifacts;
pub mod config;
pub mod summary;
pub mod train;

pub use artifacts::{MODEL_CONFIG_NAME, RunDirectory, TRAINING_CONFIG_NAME, load_config};
pub use config::TrainingConfig;
pub use summary::{SummaryWriter, prediction_table};
pub use train::{StepOutput, Trainer};
