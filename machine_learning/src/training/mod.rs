mod callbacks;
mod history;
mod param_manager;
mod trainer;

pub use callbacks::{
    Callback, EarlyStopping, FitControl, ModelCheckpoint, Monitor, ReduceLrOnPlateau,
};
pub use history::{EpochLogs, History};
pub use param_manager::{BackIter, FrontIter, ParamManager};
pub use trainer::Trainer;
