use std::{
    fs,
    path::{Path, PathBuf},
};

use image::{GrayImage, Luma};
use log::info;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{error::Result, labels::write_labels, scan::ScanFormat};

/// The labels file written next to the synthetic images.
pub const LABELS_FILE: &str = "iq_labels.txt";

const SIDE: u32 = 224;
const CENTRE: f32 = 112.;
const BRAIN_INTENSITY: u8 = 128;
const NOISE_STD: f32 = 10.;
const SCORE_MEAN: f32 = 100.;
const SCORE_STD: f32 = 15.;
const SCORE_RANGE: (f32, f32) = (70., 150.);

/// Returns the file name of the `i`-th synthetic sample.
pub fn sample_name(i: usize) -> String {
    format!("sample_mri_{i:03}.jpg")
}

/// Writes `n` synthetic brain-like grayscale images and a matching labels file.
///
/// Each image holds a filled ellipse with random axes and tilt, a handful of
/// brighter discs and gaussian noise. Scores are drawn from N(100, 15) and
/// clipped to [70, 150].
///
/// # Arguments
/// * `n` - The amount of samples to create.
/// * `dir` - The output directory, created if missing.
/// * `rng` - The random source.
///
/// # Returns
/// The paths of the written images, in order.
pub fn create_sample_data<R: Rng>(n: usize, dir: &Path, rng: &mut R) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let noise = Normal::new(0., NOISE_STD)?;
    let mut paths = Vec::with_capacity(n);

    for i in 0..n {
        let image = synthetic_scan(rng, &noise);
        let path = dir.join(sample_name(i));
        image.save(&path)?;
        paths.push(path);
    }

    let scores = Normal::new(SCORE_MEAN, SCORE_STD)?;
    let names: Vec<String> = (0..n).map(sample_name).collect();
    let rows = names.iter().map(|name| {
        let score = scores.sample(rng).clamp(SCORE_RANGE.0, SCORE_RANGE.1);
        (name.as_str(), score)
    });
    write_labels(&dir.join(LABELS_FILE), rows)?;

    info!("created {n} sample images and labels in {}", dir.display());
    Ok(paths)
}

fn synthetic_scan<R: Rng>(rng: &mut R, noise: &Normal<f32>) -> GrayImage {
    let mut canvas = vec![0f32; (SIDE * SIDE) as usize];

    let a = 80. + rng.random_range(-10..10) as f32;
    let b = 100. + rng.random_range(-10..10) as f32;
    let tilt = (rng.random_range(0..180) as f32).to_radians();
    fill(&mut canvas, BRAIN_INTENSITY as f32, |x, y| {
        let (dx, dy) = (x - CENTRE, y - CENTRE);
        let (sin, cos) = tilt.sin_cos();
        let u = dx * cos + dy * sin;
        let v = -dx * sin + dy * cos;
        (u / a).powi(2) + (v / b).powi(2) <= 1.
    });

    for _ in 0..rng.random_range(3..8) {
        let cx = rng.random_range(50..174) as f32;
        let cy = rng.random_range(50..174) as f32;
        let r = rng.random_range(5..20) as f32;
        let intensity = rng.random_range(64..255) as f32;
        fill(&mut canvas, intensity, |x, y| {
            (x - cx).powi(2) + (y - cy).powi(2) <= r * r
        });
    }

    GrayImage::from_fn(SIDE, SIDE, |x, y| {
        let v = canvas[(y * SIDE + x) as usize] + noise.sample(rng);
        Luma([v.clamp(0., 255.) as u8])
    })
}

fn fill<F>(canvas: &mut [f32], value: f32, inside: F)
where
    F: Fn(f32, f32) -> bool,
{
    for (i, px) in canvas.iter_mut().enumerate() {
        let (x, y) = ((i as u32 % SIDE) as f32, (i as u32 / SIDE) as f32);
        if inside(x, y) {
            *px = value;
        }
    }
}

/// Lists the supported scan files of a directory, sorted by path.
///
/// # Arguments
/// * `dir` - The directory to scan, not recursively.
///
/// # Returns
/// The supported files found.
pub fn discover_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && ScanFormat::from_path(&path).is_some() {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}
