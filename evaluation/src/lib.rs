mod analysis;
pub mod error;
pub mod metrics;
pub mod plots;
mod report;

pub use analysis::{
    DETAILED_RESULTS_FILE, DISTRIBUTIONS_FILE, PREDICTION_ANALYSIS_FILE, REPORT_FILE,
    analyze_model_performance, compare_models,
};
pub use error::{EvalErr, Result};
pub use metrics::{Metrics, calculate_regression_metrics};
pub use report::{PerformanceReport, write_detailed_results};
