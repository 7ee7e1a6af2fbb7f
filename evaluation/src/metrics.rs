use preprocessing::normalize;
use serde::Serialize;

use crate::error::{EvalErr, Result};

/// Standard regression scores of a set of predictions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub mae: f32,
    pub mse: f32,
    pub rmse: f32,
    pub r2: f32,
    /// Mean absolute percentage error, in percent. Samples whose true value
    /// is zero don't take part; `NaN` if no sample is left.
    pub mape: f32,
}

/// Scores predictions against the true values.
///
/// # Arguments
/// * `y_true` - The true values.
/// * `y_pred` - The predictions, one per true value.
///
/// # Returns
/// The metrics or an error if the slices are empty or of different lengths.
pub fn calculate_regression_metrics(y_true: &[f32], y_pred: &[f32]) -> Result<Metrics> {
    check_pair(y_true, y_pred)?;

    let n = y_true.len() as f64;
    let pairs = || y_true.iter().zip(y_pred).map(|(&t, &p)| (t as f64, p as f64));

    let mae = pairs().map(|(t, p)| (t - p).abs()).sum::<f64>() / n;
    let ss_res = pairs().map(|(t, p)| (t - p).powi(2)).sum::<f64>();
    let mse = ss_res / n;

    let true_mean = pairs().map(|(t, _)| t).sum::<f64>() / n;
    let ss_tot = pairs().map(|(t, _)| (t - true_mean).powi(2)).sum::<f64>();

    // a constant target scores 1 when matched exactly and 0 otherwise
    let r2 = match (ss_tot == 0., ss_res == 0.) {
        (false, _) => 1. - ss_res / ss_tot,
        (true, true) => 1.,
        (true, false) => 0.,
    };

    let (ape_sum, ape_n) = pairs()
        .filter(|&(t, _)| t != 0.)
        .fold((0., 0usize), |(sum, n), (t, p)| (sum + ((t - p) / t).abs(), n + 1));
    let mape = match ape_n {
        0 => f64::NAN,
        n => ape_sum / n as f64 * 100.,
    };

    Ok(Metrics {
        mae: mae as f32,
        mse: mse as f32,
        rmse: mse.sqrt() as f32,
        r2: r2 as f32,
        mape: mape as f32,
    })
}

pub(crate) fn check_pair(y_true: &[f32], y_pred: &[f32]) -> Result<()> {
    if y_true.len() != y_pred.len() {
        return Err(EvalErr::LengthMismatch {
            got: y_pred.len(),
            expected: y_true.len(),
        });
    }

    if y_true.is_empty() {
        return Err(EvalErr::Empty);
    }

    Ok(())
}

/// Arithmetic mean, `NaN` for an empty slice.
pub fn mean(values: &[f32]) -> f32 {
    (values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64) as f32
}

/// Population standard deviation, `NaN` for an empty slice.
pub fn std_dev(values: &[f32]) -> f32 {
    let mean = mean(values) as f64;
    let var = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / values.len() as f64;
    var.sqrt() as f32
}

/// The `p`-th percentile with linear interpolation between closest ranks,
/// see [`normalize::percentile`].
///
/// # Arguments
/// * `values` - A non empty slice in any order.
/// * `p` - The percentile in `[0, 100]`.
pub fn percentile(values: &[f32], p: f32) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    normalize::percentile(&sorted, p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn metrics_match_closed_forms() {
        let y_true = [100., 110., 90., 120.];
        let y_pred = [102., 105., 93., 120.];

        let m = calculate_regression_metrics(&y_true, &y_pred).unwrap();

        // errors: -2, 5, -3, 0
        assert!(close(m.mae, 2.5));
        assert!(close(m.mse, 9.5));
        assert!(close(m.rmse, 9.5f32.sqrt()));
        // mean 105, ss_tot = 25 + 25 + 225 + 225 = 500, ss_res = 38
        assert!(close(m.r2, 1. - 38. / 500.));
        let mape = (2. / 100. + 5. / 110. + 3. / 90.) / 4. * 100.;
        assert!(close(m.mape, mape));
    }

    #[test]
    fn perfect_predictions() {
        let y = [80., 95., 130.];
        let m = calculate_regression_metrics(&y, &y).unwrap();

        assert_eq!(m.mae, 0.);
        assert_eq!(m.rmse, 0.);
        assert_eq!(m.r2, 1.);
        assert_eq!(m.mape, 0.);
    }

    #[test]
    fn constant_target() {
        let m = calculate_regression_metrics(&[100., 100.], &[100., 100.]).unwrap();
        assert_eq!(m.r2, 1.);

        let m = calculate_regression_metrics(&[100., 100.], &[90., 110.]).unwrap();
        assert_eq!(m.r2, 0.);
    }

    #[test]
    fn zero_targets_are_left_out_of_mape() {
        let m = calculate_regression_metrics(&[0., 50.], &[1., 25.]).unwrap();
        assert!(close(m.mape, 50.));

        let m = calculate_regression_metrics(&[0.], &[1.]).unwrap();
        assert!(m.mape.is_nan());
    }

    #[test]
    fn bad_inputs_fail() {
        assert!(matches!(
            calculate_regression_metrics(&[1., 2.], &[1.]),
            Err(EvalErr::LengthMismatch {
                got: 1,
                expected: 2
            })
        ));
        assert!(matches!(
            calculate_regression_metrics(&[], &[]),
            Err(EvalErr::Empty)
        ));
    }

    #[test]
    fn summary_statistics() {
        let values = [2., 4., 4., 4., 5., 5., 7., 9.];
        assert_eq!(mean(&values), 5.);
        assert_eq!(std_dev(&values), 2.);
        assert_eq!(percentile(&values, 50.), 4.5);
        assert_eq!(percentile(&[9., 1., 5.], 100.), 9.);
        assert_eq!(percentile(&[9., 1., 5.], 0.), 1.);
    }
}
