use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use evaluation::EvalErr;
use machine_learning::MlErr;
use preprocessing::PreprocessErr;

/// The predictor module's result type.
pub type Result<T> = std::result::Result<T, IqErr>;

/// Failures of the training and prediction pipeline.
#[derive(Debug)]
pub enum IqErr {
    Io(io::Error),
    Ml(MlErr),
    Preprocess(PreprocessErr),
    Eval(EvalErr),
    Serde(serde_json::Error),
    InvalidConfig(String),
    NoData(String),
    ModelNotFound(PathBuf),
    NotReady(&'static str),
}

impl Display for IqErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IqErr::Io(e) => write!(f, "io error: {e}"),
            IqErr::Ml(e) => write!(f, "model error: {e}"),
            IqErr::Preprocess(e) => write!(f, "preprocessing error: {e}"),
            IqErr::Eval(e) => write!(f, "evaluation error: {e}"),
            IqErr::Serde(e) => write!(f, "config error: {e}"),
            IqErr::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            IqErr::NoData(msg) => write!(f, "no usable data: {msg}"),
            IqErr::ModelNotFound(path) => write!(f, "model file not found: {}", path.display()),
            IqErr::NotReady(msg) => write!(f, "not ready: {msg}"),
        }
    }
}

impl Error for IqErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            IqErr::Io(e) => Some(e),
            IqErr::Ml(e) => Some(e),
            IqErr::Preprocess(e) => Some(e),
            IqErr::Eval(e) => Some(e),
            IqErr::Serde(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for IqErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MlErr> for IqErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<PreprocessErr> for IqErr {
    fn from(value: PreprocessErr) -> Self {
        Self::Preprocess(value)
    }
}

impl From<EvalErr> for IqErr {
    fn from(value: EvalErr) -> Self {
        Self::Eval(value)
    }
}

impl From<serde_json::Error> for IqErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}
