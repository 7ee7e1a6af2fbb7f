use std::{fs, path::Path};

use csv::Writer;
use log::info;
use serde::Serialize;

use crate::{
    error::Result,
    metrics::{Metrics, calculate_regression_metrics, check_pair, mean, percentile, std_dev},
};

/// Metrics plus descriptive statistics of a set of predictions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub metrics: Metrics,
    pub n_samples: usize,
    pub true_mean: f32,
    pub true_std: f32,
    pub pred_mean: f32,
    pub pred_std: f32,
    pub residual_mean: f32,
    pub residual_std: f32,
    pub max_error: f32,
    pub min_error: f32,
    pub error_p25: f32,
    pub error_p50: f32,
    pub error_p75: f32,
    pub error_p95: f32,
}

impl PerformanceReport {
    /// Computes the report of a set of predictions.
    ///
    /// Residuals are `true - predicted`.
    ///
    /// # Arguments
    /// * `y_true` - The true values.
    /// * `y_pred` - The predictions.
    ///
    /// # Returns
    /// The report or an error if the inputs are empty or of different lengths.
    pub fn new(y_true: &[f32], y_pred: &[f32]) -> Result<Self> {
        let metrics = calculate_regression_metrics(y_true, y_pred)?;
        let residuals = residuals(y_true, y_pred);
        let errors: Vec<f32> = residuals.iter().map(|r| r.abs()).collect();

        Ok(Self {
            metrics,
            n_samples: y_true.len(),
            true_mean: mean(y_true),
            true_std: std_dev(y_true),
            pred_mean: mean(y_pred),
            pred_std: std_dev(y_pred),
            residual_mean: mean(&residuals),
            residual_std: std_dev(&residuals),
            max_error: errors.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            min_error: errors.iter().copied().fold(f32::INFINITY, f32::min),
            error_p25: percentile(&errors, 25.),
            error_p50: percentile(&errors, 50.),
            error_p75: percentile(&errors, 75.),
            error_p95: percentile(&errors, 95.),
        })
    }

    /// Renders the report as plain text.
    pub fn render(&self) -> String {
        let m = &self.metrics;
        format!(
            "MRI IQ Prediction Performance Report
====================================

Dataset Statistics:
- Number of samples: {n}
- True IQ Mean ± Std: {tm:.2} ± {ts:.2}
- Predicted IQ Mean ± Std: {pm:.2} ± {ps:.2}

Prediction Metrics:
- Mean Absolute Error (MAE): {mae:.2} IQ points
- Root Mean Square Error (RMSE): {rmse:.2} IQ points
- R-squared (R²): {r2:.3}
- Mean Absolute Percentage Error (MAPE): {mape:.2}%

Error Analysis:
- Residual Mean ± Std: {rm:.2} ± {rs:.2}
- Maximum Error: {max:.2} IQ points
- Minimum Error: {min:.2} IQ points

Error Percentiles:
- 95th percentile: {p95:.2} IQ points
- 75th percentile: {p75:.2} IQ points
- 50th percentile (median): {p50:.2} IQ points
- 25th percentile: {p25:.2} IQ points

Interpretation:
- An MAE of {mae:.1} means predictions are typically off by ±{mae:.1} IQ points
- An R² of {r2:.3} means the model explains {explained:.1}% of the variance
- 95% of predictions have errors ≤ {p95:.1} IQ points
",
            n = self.n_samples,
            tm = self.true_mean,
            ts = self.true_std,
            pm = self.pred_mean,
            ps = self.pred_std,
            mae = m.mae,
            rmse = m.rmse,
            r2 = m.r2,
            mape = m.mape,
            rm = self.residual_mean,
            rs = self.residual_std,
            max = self.max_error,
            min = self.min_error,
            p95 = self.error_p95,
            p75 = self.error_p75,
            p50 = self.error_p50,
            p25 = self.error_p25,
            explained = m.r2 * 100.,
        )
    }

    /// Writes the rendered report, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, self.render())?;
        info!("report saved to {}", path.display());
        Ok(())
    }
}

pub(crate) fn residuals(y_true: &[f32], y_pred: &[f32]) -> Vec<f32> {
    y_true.iter().zip(y_pred).map(|(t, p)| t - p).collect()
}

#[derive(Serialize)]
struct ResultRow {
    true_iq: f32,
    predicted_iq: f32,
    residual: f32,
    absolute_error: f32,
}

/// Writes one `true_iq,predicted_iq,residual,absolute_error` row per sample.
///
/// # Arguments
/// * `path` - The CSV file to create.
/// * `y_true` - The true values.
/// * `y_pred` - The predictions.
pub fn write_detailed_results(path: &Path, y_true: &[f32], y_pred: &[f32]) -> Result<()> {
    check_pair(y_true, y_pred)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = Writer::from_path(path)?;
    for (&t, &p) in y_true.iter().zip(y_pred) {
        writer.serialize(ResultRow {
            true_iq: t,
            predicted_iq: p,
            residual: t - p,
            absolute_error: (t - p).abs(),
        })?;
    }
    writer.flush()?;

    info!("detailed results saved to {}", path.display());
    Ok(())
}
