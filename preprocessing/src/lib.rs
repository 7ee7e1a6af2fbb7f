pub mod augment;
pub mod error;
pub mod labels;
pub mod normalize;
mod preprocessor;
pub mod resize;
pub mod scan;
pub mod synthetic;

pub use augment::AugmentConfig;
pub use error::{PreprocessErr, Result};
pub use labels::{read_labels, write_labels};
pub use preprocessor::{Processed, Preprocessor};
pub use scan::{Scan, ScanFormat, TargetShape, load_scan};
pub use synthetic::{LABELS_FILE, create_sample_data, discover_images, sample_name};
