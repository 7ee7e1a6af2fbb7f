use std::{fs, path::Path};

use log::info;

use crate::{
    error::Result,
    metrics::{Metrics, calculate_regression_metrics},
    plots::{plot_iq_distributions, plot_model_comparison, plot_prediction_results},
    report::{PerformanceReport, write_detailed_results},
};

pub const PREDICTION_ANALYSIS_FILE: &str = "prediction_analysis.png";
pub const DISTRIBUTIONS_FILE: &str = "iq_distributions.png";
pub const REPORT_FILE: &str = "performance_report.txt";
pub const DETAILED_RESULTS_FILE: &str = "detailed_results.csv";

/// Writes the full analysis of a set of predictions into `out_dir`: the
/// prediction plots, the score distributions, the text report and the per
/// sample CSV.
///
/// # Arguments
/// * `y_true` - The true values.
/// * `y_pred` - The predictions.
/// * `out_dir` - The directory to write to, created if missing.
///
/// # Returns
/// The performance report.
pub fn analyze_model_performance(y_true: &[f32], y_pred: &[f32], out_dir: &Path) -> Result<PerformanceReport> {
    let report = PerformanceReport::new(y_true, y_pred)?;
    fs::create_dir_all(out_dir)?;

    plot_prediction_results(&out_dir.join(PREDICTION_ANALYSIS_FILE), y_true, y_pred)?;
    plot_iq_distributions(&out_dir.join(DISTRIBUTIONS_FILE), y_true, y_pred)?;
    report.save(&out_dir.join(REPORT_FILE))?;
    write_detailed_results(&out_dir.join(DETAILED_RESULTS_FILE), y_true, y_pred)?;

    info!("{}", report.render());
    Ok(report)
}

/// Scores several models on their own predictions.
///
/// # Arguments
/// * `results` - `(name, y_true, y_pred)` per model.
/// * `plot` - Where to draw the comparison chart, if anywhere.
///
/// # Returns
/// The metrics of every model, in input order.
pub fn compare_models(results: &[(&str, &[f32], &[f32])], plot: Option<&Path>) -> Result<Vec<(String, Metrics)>> {
    let scored = results
        .iter()
        .map(|&(name, y_true, y_pred)| {
            calculate_regression_metrics(y_true, y_pred).map(|m| (name.to_string(), m))
        })
        .collect::<Result<Vec<_>>>()?;

    if let Some(path) = plot {
        plot_model_comparison(path, &scored)?;
    }

    Ok(scored)
}
