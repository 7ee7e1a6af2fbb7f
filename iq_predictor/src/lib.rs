pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
mod predictor;
mod trainer;

pub use config::{ArchConfig, ModelKind};
pub use data::LabeledData;
pub use error::{IqErr, Result};
pub use predictor::IqPredictor;
pub use trainer::{BEST_MODEL_FILE, IqTrainer, MODEL_EXTENSION, MODEL_FILE, TrainerState};
