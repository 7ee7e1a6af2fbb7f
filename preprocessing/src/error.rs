use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use image::ImageError;
use nifti::NiftiError;
use rand_distr::NormalError;

/// The preprocessing module's result type.
pub type Result<T> = std::result::Result<T, PreprocessErr>;

/// Failures while reading, reshaping or writing scans.
#[derive(Debug)]
pub enum PreprocessErr {
    Io(io::Error),
    Image(ImageError),
    Nifti(NiftiError),
    Csv(csv::Error),
    Sampling(NormalError),
    UnsupportedFormat(PathBuf),
    EmptyScan(PathBuf),
    InvalidShape(String),
    IncompatibleTarget {
        scan_dims: usize,
        target_dims: usize,
    },
}

impl Display for PreprocessErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreprocessErr::Io(e) => write!(f, "io error: {e}"),
            PreprocessErr::Image(e) => write!(f, "image error: {e}"),
            PreprocessErr::Nifti(e) => write!(f, "nifti error: {e}"),
            PreprocessErr::Csv(e) => write!(f, "csv error: {e}"),
            PreprocessErr::Sampling(e) => write!(f, "sampling error: {e}"),
            PreprocessErr::UnsupportedFormat(path) => {
                write!(f, "unsupported scan format: {}", path.display())
            }
            PreprocessErr::EmptyScan(path) => write!(f, "scan {} has no voxels", path.display()),
            PreprocessErr::InvalidShape(msg) => write!(f, "invalid shape: {msg}"),
            PreprocessErr::IncompatibleTarget {
                scan_dims,
                target_dims,
            } => write!(
                f,
                "a {scan_dims}-D scan cannot be fitted to a {target_dims}-D target"
            ),
        }
    }
}

impl Error for PreprocessErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PreprocessErr::Io(e) => Some(e),
            PreprocessErr::Image(e) => Some(e),
            PreprocessErr::Nifti(e) => Some(e),
            PreprocessErr::Csv(e) => Some(e),
            PreprocessErr::Sampling(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PreprocessErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ImageError> for PreprocessErr {
    fn from(value: ImageError) -> Self {
        Self::Image(value)
    }
}

impl From<NiftiError> for PreprocessErr {
    fn from(value: NiftiError) -> Self {
        Self::Nifti(value)
    }
}

impl From<csv::Error> for PreprocessErr {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

impl From<NormalError> for PreprocessErr {
    fn from(value: NormalError) -> Self {
        Self::Sampling(value)
    }
}
