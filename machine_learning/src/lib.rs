pub mod arch;
pub mod dataset;
pub mod error;
pub mod initialization;
mod network;
pub mod optimization;
mod persistence;
mod test;
pub mod training;

pub use error::{MlErr, Result};
pub use network::Network;
