use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use plotters::drawing::DrawingAreaErrorKind;

/// The evaluation module's result type.
pub type Result<T> = std::result::Result<T, EvalErr>;

/// Failures while scoring predictions or writing reports.
#[derive(Debug)]
pub enum EvalErr {
    Io(io::Error),
    Csv(csv::Error),
    Plot(String),
    LengthMismatch { got: usize, expected: usize },
    Empty,
}

impl Display for EvalErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalErr::Io(e) => write!(f, "io error: {e}"),
            EvalErr::Csv(e) => write!(f, "csv error: {e}"),
            EvalErr::Plot(msg) => write!(f, "plot error: {msg}"),
            EvalErr::LengthMismatch { got, expected } => write!(
                f,
                "got {got} predictions for {expected} true values"
            ),
            EvalErr::Empty => write!(f, "there are no values to evaluate"),
        }
    }
}

impl Error for EvalErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EvalErr::Io(e) => Some(e),
            EvalErr::Csv(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EvalErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<csv::Error> for EvalErr {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

impl<E: Error + Send + Sync> From<DrawingAreaErrorKind<E>> for EvalErr {
    fn from(value: DrawingAreaErrorKind<E>) -> Self {
        Self::Plot(value.to_string())
    }
}
