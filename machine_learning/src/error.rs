use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use ndarray::ShapeError;
use rand_distr::uniform::Error as UniformError;
use safetensors::SafeTensorError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    Io(io::Error),
    Shape(ShapeError),
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    RankMismatch {
        layer: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidInput(String),
    Artifact(String),
    Serde(serde_json::Error),
    SafeTensors(SafeTensorError),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::Io(e) => write!(f, "io error: {e}"),
            MlErr::Shape(e) => write!(f, "shape error: {e}"),
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch for {what}, got {got} and expected {expected}"
            ),
            MlErr::RankMismatch {
                layer,
                got,
                expected,
            } => write!(
                f,
                "The {layer} layer expects a rank {expected} input but got rank {got}"
            ),
            MlErr::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            MlErr::Artifact(msg) => write!(f, "invalid model artifact: {msg}"),
            MlErr::Serde(e) => write!(f, "serialization error: {e}"),
            MlErr::SafeTensors(e) => write!(f, "safetensors error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Io(e) => Some(e),
            MlErr::Shape(e) => Some(e),
            MlErr::Serde(e) => Some(e),
            MlErr::SafeTensors(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

impl From<SafeTensorError> for MlErr {
    fn from(value: SafeTensorError) -> Self {
        Self::SafeTensors(value)
    }
}

impl From<UniformError> for MlErr {
    fn from(value: UniformError) -> Self {
        Self::InvalidInput(value.to_string())
    }
}
