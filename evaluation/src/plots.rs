//! PNG charts of predictions, score distributions and training curves.
//!
//! Text is drawn with an embedded DejaVu Sans face registered as the
//! `sans-serif` family the first time a chart is drawn.

use std::{fs, ops::Range, path::Path, sync::OnceLock};

use log::info;
use plotters::{
    coord::{Shift, types::RangedCoordf64},
    prelude::*,
    style::{FontStyle, register_font},
};

use crate::{
    error::{EvalErr, Result},
    metrics::{Metrics, calculate_regression_metrics, check_pair, mean, percentile, std_dev},
    report::residuals,
};

type Area<'a> = DrawingArea<BitMapBackend<'a>, Shift>;
type Chart<'a, 'b> = ChartContext<'a, BitMapBackend<'b>, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

static FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");
const FONT_FAMILY: &str = "sans-serif";

const GRID_SIZE: (u32, u32) = (1200, 960);
const ROW_SIZE: (u32, u32) = (1200, 480);
const CARD_SIZE: (u32, u32) = (1200, 700);
const GAUGE_HEIGHT: u32 = 160;
const MARGIN: u32 = 20;
const BINS: usize = 30;
const ORANGE: RGBColor = RGBColor(255, 165, 0);
const SCORE_AXIS: Range<f64> = 40.0..160.0;
const MEAN_SCORE: f64 = 100.;

/// A row-major grayscale image.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub pixels: &'a [f32],
    pub width: usize,
}

impl Plane<'_> {
    fn height(&self) -> usize {
        self.pixels.len().checked_div(self.width).unwrap_or(0)
    }
}

/// The caption and axis descriptions of a chart.
#[derive(Clone, Copy)]
struct Labels<'a> {
    caption: &'a str,
    x: &'a str,
    y: &'a str,
}

/// Draws a 2×2 panel: true against predicted with the identity line and the
/// R² score, residuals against predictions, the residual histogram and the
/// absolute error histogram.
///
/// # Arguments
/// * `path` - The PNG to write.
/// * `y_true` - The true values.
/// * `y_pred` - The predictions.
pub fn plot_prediction_results(path: &Path, y_true: &[f32], y_pred: &[f32]) -> Result<()> {
    check_pair(y_true, y_pred)?;
    let r2 = calculate_regression_metrics(y_true, y_pred)?.r2;

    let root = canvas(path, GRID_SIZE)?;
    let body = root.titled("IQ Prediction Results", (FONT_FAMILY, 30))?;
    let panels = body.split_evenly((2, 2));

    let (lo, hi) = bounds(y_true.iter().copied());
    let points: Vec<_> = y_true
        .iter()
        .zip(y_pred)
        .map(|(&t, &p)| (t as f64, p as f64))
        .collect();
    let mut chart = scatter(
        &panels[0],
        Labels {
            caption: "True vs Predicted IQ",
            x: "True IQ",
            y: "Predicted IQ",
        },
        &points,
        [(lo as f64, lo as f64), (hi as f64, hi as f64)],
    )?;
    let (x, y) = (chart.x_range(), chart.y_range());
    chart.draw_series(std::iter::once(Text::new(
        format!("R² = {r2:.3}"),
        (x.start + (x.end - x.start) * 0.05, y.end - (y.end - y.start) * 0.05),
        (FONT_FAMILY, 20).into_font(),
    )))?;

    let residuals = residuals(y_true, y_pred);
    let points: Vec<_> = y_pred
        .iter()
        .zip(&residuals)
        .map(|(&p, &r)| (p as f64, r as f64))
        .collect();
    let (plo, phi) = bounds(y_pred.iter().copied());
    scatter(
        &panels[1],
        Labels {
            caption: "Residual Plot",
            x: "Predicted IQ",
            y: "Residuals (True - Predicted)",
        },
        &points,
        [(plo as f64, 0.), (phi as f64, 0.)],
    )?;

    let residual_mean = mean(&residuals);
    let (mut chart, top) = histogram(
        &panels[2],
        Labels {
            caption: "Distribution of Residuals",
            x: "Residuals",
            y: "Frequency",
        },
        &residuals,
        BLUE,
        false,
    )?;
    marker(&mut chart, residual_mean, top, RED, format!("Mean: {residual_mean:.2}"))?;
    legend(&mut chart)?;

    let errors: Vec<f32> = residuals.iter().map(|r| r.abs()).collect();
    let mae = mean(&errors);
    let (mut chart, top) = histogram(
        &panels[3],
        Labels {
            caption: "Distribution of Absolute Errors",
            x: "Absolute Error",
            y: "Frequency",
        },
        &errors,
        ORANGE,
        false,
    )?;
    marker(&mut chart, mae, top, RED, format!("MAE: {mae:.2}"))?;
    legend(&mut chart)?;

    root.present()?;
    info!("prediction analysis saved to {}", path.display());
    Ok(())
}

/// Draws the true and the predicted score distributions side by side, each
/// as a density histogram with its fitted normal curve, mean and median.
pub fn plot_iq_distributions(path: &Path, y_true: &[f32], y_pred: &[f32]) -> Result<()> {
    check_pair(y_true, y_pred)?;
    let root = canvas(path, ROW_SIZE)?;
    let panels = root.split_evenly((1, 2));

    distribution(&panels[0], "True IQ Distribution", y_true)?;
    distribution(&panels[1], "Predicted IQ Distribution", y_pred)?;

    root.present()?;
    info!("score distributions saved to {}", path.display());
    Ok(())
}

/// Draws the loss and the mean absolute error per epoch, training in blue and
/// validation in orange.
///
/// # Arguments
/// * `path` - The PNG to write.
/// * `loss` - The training loss per epoch.
/// * `val_loss` - The validation loss per epoch, if any.
/// * `mae` - The training mean absolute error per epoch.
/// * `val_mae` - The validation mean absolute error per epoch, if any.
pub fn plot_training_curves(
    path: &Path,
    loss: &[f32],
    val_loss: Option<&[f32]>,
    mae: &[f32],
    val_mae: Option<&[f32]>,
) -> Result<()> {
    let root = canvas(path, ROW_SIZE)?;
    let panels = root.split_evenly((1, 2));

    curves(
        &panels[0],
        Labels {
            caption: "Model Loss",
            x: "Epoch",
            y: "Loss",
        },
        loss,
        val_loss,
    )?;
    curves(
        &panels[1],
        Labels {
            caption: "Model MAE",
            x: "Epoch",
            y: "MAE",
        },
        mae,
        val_mae,
    )?;

    root.present()?;
    info!("training history plot saved to {}", path.display());
    Ok(())
}

/// Draws one bar per model for MAE, RMSE, R² and MAPE in a 2×2 panel, each
/// bar topped by its value. Models keep the same color in every panel.
pub fn plot_model_comparison(path: &Path, models: &[(String, Metrics)]) -> Result<()> {
    let root = canvas(path, GRID_SIZE)?;
    let panels = root.split_evenly((2, 2));

    let pickers: [(&str, &str, fn(&Metrics) -> f32); 4] = [
        ("Mean Absolute Error", "MAE", |m| m.mae),
        ("Root Mean Square Error", "RMSE", |m| m.rmse),
        ("R-squared", "R2", |m| m.r2),
        ("Mean Absolute Percentage Error", "MAPE", |m| m.mape),
    ];
    for (panel, (caption, metric, pick)) in panels.iter().zip(pickers) {
        let bars: Vec<(&str, f32)> = models.iter().map(|(name, m)| (name.as_str(), pick(m))).collect();
        bar_chart(
            panel,
            Labels {
                caption,
                x: "Model",
                y: metric,
            },
            &bars,
        )?;
    }

    root.present()?;
    info!("model comparison saved to {}", path.display());
    Ok(())
}

/// Draws a scan next to its preprocessed version with a gauge of the
/// predicted score underneath. The gauge spans 40 to 160 with a mark at 100.
///
/// # Arguments
/// * `path` - The PNG to write.
/// * `name` - The scan's file name, shown above the original.
/// * `original` - The scan as read.
/// * `processed` - The scan as fed to the model.
/// * `score` - The predicted score.
pub fn plot_scan_prediction(
    path: &Path,
    name: &str,
    original: Plane<'_>,
    processed: Plane<'_>,
    score: f32,
) -> Result<()> {
    let root = canvas(path, CARD_SIZE)?;
    let (top, bottom) = root.split_vertically(CARD_SIZE.1 - GAUGE_HEIGHT);
    let panels = top.split_evenly((1, 2));

    grayscale(&panels[0].titled(&format!("Original MRI: {name}"), (FONT_FAMILY, 22))?, original)?;
    grayscale(
        &panels[1].titled(&format!("Processed MRI, predicted IQ: {score:.1}"), (FONT_FAMILY, 22))?,
        processed,
    )?;

    let caption = format!("Predicted IQ: {score:.1}");
    let mut chart = ChartBuilder::on(&bottom)
        .margin(MARGIN)
        .caption(&caption, (FONT_FAMILY, 24))
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(SCORE_AXIS, 0.0..1.0)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .y_labels(0)
        .x_desc("IQ")
        .draw()?;

    let score = (score as f64).clamp(SCORE_AXIS.start, SCORE_AXIS.end);
    chart.draw_series(std::iter::once(Rectangle::new(
        [(SCORE_AXIS.start, 0.2), (score, 0.8)],
        BLUE.mix(0.7).filled(),
    )))?;
    chart.draw_series(LineSeries::new(
        [(MEAN_SCORE, 0.), (MEAN_SCORE, 1.)],
        RED.stroke_width(2),
    ))?;

    root.present()?;
    info!("visualization saved to {}", path.display());
    Ok(())
}

/// Registers the embedded face once per process.
fn register_fonts() -> Result<()> {
    static REGISTERED: OnceLock<bool> = OnceLock::new();

    let registered =
        *REGISTERED.get_or_init(|| register_font(FONT_FAMILY, FontStyle::Normal, FONT).is_ok());
    if registered {
        Ok(())
    } else {
        Err(EvalErr::Plot("the embedded font couldn't be loaded".into()))
    }
}

fn canvas(path: &Path, size: (u32, u32)) -> Result<Area<'_>> {
    register_fonts()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    Ok(root)
}

/// Builds a chart with its caption, axis descriptions and mesh.
fn labelled<'a, 'b>(
    area: &'a Area<'b>,
    labels: Labels<'_>,
    x: Range<f64>,
    y: Range<f64>,
) -> Result<Chart<'a, 'b>> {
    let mut chart = ChartBuilder::on(area)
        .margin(MARGIN)
        .caption(labels.caption, (FONT_FAMILY, 22))
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(x, y)?;

    chart
        .configure_mesh()
        .light_line_style(BLACK.mix(0.05))
        .x_desc(labels.x)
        .y_desc(labels.y)
        .draw()?;

    Ok(chart)
}

fn scatter<'a, 'b>(
    area: &'a Area<'b>,
    labels: Labels<'_>,
    points: &[(f64, f64)],
    line: [(f64, f64); 2],
) -> Result<Chart<'a, 'b>> {
    let x = padded(points.iter().map(|p| p.0).chain(line.iter().map(|p| p.0)));
    let y = padded(points.iter().map(|p| p.1).chain(line.iter().map(|p| p.1)));

    let mut chart = labelled(area, labels, x, y)?;
    chart.draw_series(
        points
            .iter()
            .map(|&p| Circle::new(p, 4, BLUE.mix(0.6).filled())),
    )?;
    chart.draw_series(LineSeries::new(line, RED.stroke_width(2)))?;
    Ok(chart)
}

/// Draws the bars of a histogram.
///
/// # Returns
/// The chart together with the top of its y axis.
fn histogram<'a, 'b>(
    area: &'a Area<'b>,
    labels: Labels<'_>,
    values: &[f32],
    color: RGBColor,
    density: bool,
) -> Result<(Chart<'a, 'b>, f64)> {
    let bins = bin(values, BINS, density);
    let x = match (bins.first(), bins.last()) {
        (Some(first), Some(last)) => first.0..last.1,
        _ => 0.0..1.0,
    };
    let top = bins.iter().map(|b| b.2).fold(0., f64::max).max(1e-6) * 1.1;

    let mut chart = labelled(area, labels, x, 0.0..top)?;
    chart.draw_series(
        bins.iter()
            .map(|&(lo, hi, h)| Rectangle::new([(lo, 0.), (hi, h)], color.mix(0.7).filled())),
    )?;
    chart.draw_series(
        bins.iter()
            .map(|&(lo, hi, h)| Rectangle::new([(lo, 0.), (hi, h)], BLACK.stroke_width(1))),
    )?;

    Ok((chart, top))
}

/// A labelled vertical line at `at`.
fn marker(chart: &mut Chart<'_, '_>, at: f32, top: f64, color: RGBColor, label: String) -> Result<()> {
    let at = at as f64;
    chart
        .draw_series(LineSeries::new([(at, 0.), (at, top)], color.stroke_width(2)))?
        .label(label)
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    Ok(())
}

fn legend<'a, 'b: 'a>(chart: &mut Chart<'a, 'b>) -> Result<()> {
    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .label_font((FONT_FAMILY, 16))
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    Ok(())
}

fn distribution(area: &Area<'_>, caption: &str, values: &[f32]) -> Result<()> {
    let mu = mean(values);
    let median = percentile(values, 50.);
    let (mut chart, top) = histogram(
        area,
        Labels {
            caption,
            x: "IQ Score",
            y: "Density",
        },
        values,
        BLUE,
        true,
    )?;
    marker(&mut chart, mu, top, RED, format!("Mean: {mu:.1}"))?;
    marker(&mut chart, median, top, GREEN, format!("Median: {median:.1}"))?;

    let sigma = std_dev(values) as f64;
    if sigma > 0. {
        let x = chart.x_range();
        let norm = 1. / (sigma * (2. * std::f64::consts::PI).sqrt());
        let curve = (0..100).map(|i| {
            let x = x.start + (x.end - x.start) * i as f64 / 99.;
            let z = (x - mu as f64) / sigma;
            (x, norm * (-0.5 * z * z).exp())
        });
        chart
            .draw_series(LineSeries::new(curve, RED.stroke_width(2)))?
            .label(format!("Normal fit (σ = {sigma:.1})"))
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED.stroke_width(2)));
    }

    legend(&mut chart)
}

fn curves(area: &Area<'_>, labels: Labels<'_>, train: &[f32], validation: Option<&[f32]>) -> Result<()> {
    let epochs = train.len().max(validation.map_or(0, <[f32]>::len)).max(2);
    let x = 0.0..(epochs - 1) as f64;
    let y = padded(
        train
            .iter()
            .chain(validation.unwrap_or_default())
            .map(|&v| v as f64),
    );

    let mut chart = labelled(area, labels, x, y)?;

    let series = |values: &[f32]| {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| (i as f64, v as f64))
            .collect::<Vec<_>>()
    };

    chart
        .draw_series(LineSeries::new(series(train), BLUE.stroke_width(2)))?
        .label("Training")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE.stroke_width(2)));
    if let Some(validation) = validation {
        chart
            .draw_series(LineSeries::new(series(validation), ORANGE.stroke_width(2)))?
            .label("Validation")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], ORANGE.stroke_width(2)));
    }

    legend(&mut chart)
}

fn bar_chart(area: &Area<'_>, labels: Labels<'_>, bars: &[(&str, f32)]) -> Result<()> {
    let x = 0.0..bars.len().max(1) as f64;
    let finite = bars.iter().map(|b| b.1).filter(|v| v.is_finite()).map(|v| v as f64);
    let lo = finite.clone().fold(0., f64::min);
    let hi = finite.fold(0., f64::max);
    let y = widened(lo, hi);

    let mut chart = ChartBuilder::on(area)
        .margin(MARGIN)
        .caption(labels.caption, (FONT_FAMILY, 22))
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 30)
        .build_cartesian_2d(x.clone(), y)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(0)
        .light_line_style(BLACK.mix(0.05))
        .x_desc(labels.x)
        .y_desc(labels.y)
        .draw()?;

    for (i, &(name, value)) in bars.iter().enumerate() {
        if !value.is_finite() {
            continue;
        }

        let color = Palette99::pick(i).to_rgba();
        let (start, value) = (i as f64, value as f64);
        chart
            .draw_series(std::iter::once(Rectangle::new(
                [(start + 0.15, 0.), (start + 0.85, value)],
                color.filled(),
            )))?
            .label(name)
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
        chart.draw_series(std::iter::once(Text::new(
            format!("{value:.3}"),
            (start + 0.4, value),
            (FONT_FAMILY, 16).into_font(),
        )))?;
    }

    chart.draw_series(LineSeries::new([(x.start, 0.), (x.end, 0.)], BLACK.stroke_width(1)))?;
    legend(&mut chart)
}

fn grayscale(area: &Area<'_>, plane: Plane<'_>) -> Result<()> {
    let (w, h) = (plane.width, plane.height());
    if w == 0 || h == 0 {
        return Ok(());
    }

    let (lo, hi) = bounds(plane.pixels.iter().copied());
    let range = (hi - lo).max(f32::EPSILON);

    let (aw, ah) = area.dim_in_pixel();
    let (aw, ah) = (aw.saturating_sub(2 * MARGIN) as usize, ah.saturating_sub(2 * MARGIN) as usize);
    let scale = (aw as f32 / w as f32).min(ah as f32 / h as f32);
    let (dw, dh) = ((w as f32 * scale) as usize, (h as f32 * scale) as usize);
    let (ox, oy) = (MARGIN as usize + (aw - dw) / 2, MARGIN as usize + (ah - dh) / 2);

    for py in 0..dh {
        let sy = ((py as f32 / scale) as usize).min(h - 1);
        for px in 0..dw {
            let sx = ((px as f32 / scale) as usize).min(w - 1);
            let v = (plane.pixels[sy * w + sx] - lo) / range;
            let v = (v.clamp(0., 1.) * 255.) as u8;
            area.draw_pixel(((ox + px) as i32, (oy + py) as i32), &RGBColor(v, v, v))?;
        }
    }

    Ok(())
}

/// `(lo, hi, height)` per bin, counts or densities.
fn bin(values: &[f32], bins: usize, density: bool) -> Vec<(f64, f64, f64)> {
    if values.is_empty() {
        return Vec::new();
    }

    let (lo, hi) = bounds(values.iter().copied());
    let Range { start: lo, end: hi } = if lo < hi {
        lo as f64..hi as f64
    } else {
        lo as f64 - 0.5..hi as f64 + 0.5
    };
    let width = (hi - lo) / bins as f64;

    let mut counts = vec![0usize; bins];
    for &v in values {
        let i = ((v as f64 - lo) / width) as usize;
        counts[i.min(bins - 1)] += 1;
    }

    let scale = if density {
        1. / (values.len() as f64 * width)
    } else {
        1.
    };

    counts
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let start = lo + width * i as f64;
            (start, start + width, c as f64 * scale)
        })
        .collect()
}

fn bounds(values: impl Iterator<Item = f32>) -> (f32, f32) {
    values
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

fn padded(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));

    if lo.is_finite() && hi.is_finite() {
        widened(lo, hi)
    } else {
        0.0..1.0
    }
}

fn widened(lo: f64, hi: f64) -> Range<f64> {
    let pad = ((hi - lo) * 0.05).max(0.5);
    lo - pad..hi + pad
}
