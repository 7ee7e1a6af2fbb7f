mod batch_norm;
mod conv;
mod dense;
mod dropout;
mod global_avg_pool;
mod layer;
mod max_pool;

pub use batch_norm::BatchNorm;
pub use conv::Conv;
pub use dense::Dense;
pub use dropout::Dropout;
pub use global_avg_pool::GlobalAvgPool;
pub use layer::{Layer, Mode};
pub use max_pool::MaxPool;
