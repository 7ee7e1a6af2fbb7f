use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use ndarray::{Array3, ArrayD, Axis};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    augment::{AugmentConfig, augment as augment_image},
    error::{PreprocessErr, Result},
    normalize::normalize,
    resize::{resize_planar, resize_volume},
    scan::{Scan, TargetShape, load_scan},
};

/// A preprocessed scan together with the file it came from.
#[derive(Debug, Clone)]
pub struct Processed {
    pub path: PathBuf,
    pub tensor: ArrayD<f32>,
}

/// Turns scan files into channel-last tensors of a fixed shape.
pub struct Preprocessor {
    target: TargetShape,
    normalize: bool,
    augment: AugmentConfig,
    rng: StdRng,
    log_target: String,
}

impl Preprocessor {
    /// Creates a new `Preprocessor` with normalization on and the default augmentation.
    ///
    /// # Arguments
    /// * `target` - The shape every tensor is fitted to.
    /// * `seed` - The seed of the augmentation randomness, random if `None`.
    pub fn new(target: TargetShape, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            target,
            normalize: true,
            augment: AugmentConfig::default(),
            rng,
            log_target: "preprocessing".to_string(),
        }
    }

    /// Turns intensity normalization on or off.
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Replaces the augmentation ranges.
    pub fn with_augment(mut self, config: AugmentConfig) -> Self {
        self.augment = config;
        self
    }

    /// Sets the target this instance logs under.
    pub fn with_log_target(mut self, target: impl Into<String>) -> Self {
        self.log_target = target.into();
        self
    }

    pub fn target(&self) -> TargetShape {
        self.target
    }

    /// Preprocesses a single file.
    ///
    /// # Arguments
    /// * `path` - The scan file.
    /// * `augment` - Whether to apply random augmentation.
    ///
    /// # Returns
    /// The channel-last tensor or `None` if the file couldn't be processed.
    pub fn preprocess(&mut self, path: &Path, augment: bool) -> Option<ArrayD<f32>> {
        match self.try_preprocess(path, augment) {
            Ok(tensor) => Some(tensor),
            Err(e) => {
                warn!(target: self.log_target.as_str(), "failed to preprocess {}: {e}", path.display());
                None
            }
        }
    }

    /// Preprocesses a single file, reporting why it failed.
    ///
    /// Volumes fitted to a planar target are reduced to their central
    /// cross-section along the depth axis. Planar scans can't be fitted to a
    /// volumetric target.
    ///
    /// # Arguments
    /// * `path` - The scan file.
    /// * `augment` - Whether to apply random augmentation.
    ///
    /// # Returns
    /// A tensor with shape `target.input_shape()`.
    pub fn try_preprocess(&mut self, path: &Path, augment: bool) -> Result<ArrayD<f32>> {
        let scan = load_scan(path)?;
        info!(target: self.log_target.as_str(), "loaded {}, shape: {:?}", path.display(), scan.shape());

        let mut fitted = self.fit(scan)?;

        if self.normalize {
            match &mut fitted {
                Scan::Planar(image) => normalize(image),
                Scan::Volumetric(volume) => normalize(volume),
            }
        }

        if augment {
            fitted = match fitted {
                Scan::Planar(image) => Scan::Planar(augment_image(&image, &self.augment, &mut self.rng)),
                volumetric => {
                    debug!(target: self.log_target.as_str(), "augmentation skipped for volume {}", path.display());
                    volumetric
                }
            };
        }

        let tensor = match fitted {
            Scan::Planar(image) => image.insert_axis(Axis(2)).into_dyn(),
            Scan::Volumetric(volume) => volume.insert_axis(Axis(3)).into_dyn(),
        };

        Ok(tensor)
    }

    /// Preprocesses many files, skipping the ones that fail.
    ///
    /// # Arguments
    /// * `paths` - The scan files.
    /// * `augment` - Whether to apply random augmentation.
    ///
    /// # Returns
    /// The processed scans in input order.
    pub fn preprocess_batch<I, P>(&mut self, paths: I, augment: bool) -> Vec<Processed>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths
            .into_iter()
            .filter_map(|path| {
                let path = path.as_ref();
                self.preprocess(path, augment).map(|tensor| Processed {
                    path: path.to_path_buf(),
                    tensor,
                })
            })
            .collect()
    }

    fn fit(&self, scan: Scan) -> Result<Scan> {
        match (scan, self.target) {
            (Scan::Planar(image), TargetShape::Planar { height, width }) => {
                Ok(Scan::Planar(resize_planar(&image, height, width)?))
            }
            (
                Scan::Volumetric(volume),
                TargetShape::Volumetric {
                    height,
                    width,
                    depth,
                },
            ) => Ok(Scan::Volumetric(resize_volume(
                &volume,
                (height, width, depth),
            )?)),
            (Scan::Volumetric(volume), TargetShape::Planar { height, width }) => {
                let slice = central_slice(&volume);
                Ok(Scan::Planar(resize_planar(&slice, height, width)?))
            }
            (scan, target) => Err(PreprocessErr::IncompatibleTarget {
                scan_dims: scan.ndim(),
                target_dims: target.ndim(),
            }),
        }
    }
}

fn central_slice(volume: &Array3<f32>) -> ndarray::Array2<f32> {
    let depth = volume.len_of(Axis(2));
    volume.index_axis(Axis(2), depth / 2).to_owned()
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;

    fn planar(height: usize, width: usize) -> TargetShape {
        TargetShape::Planar { height, width }
    }

    fn write_gradient(path: &Path, w: u32, h: u32) {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn planar_scan_is_resized_and_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        write_gradient(&path, 40, 30);

        let mut preprocessor = Preprocessor::new(planar(16, 20), Some(0));
        let tensor = preprocessor.try_preprocess(&path, false).unwrap();

        assert_eq!(tensor.shape(), &[16, 20, 1]);
        assert!(tensor.iter().all(|&v| (0. ..=1.).contains(&v)));
        assert!(tensor.iter().any(|&v| v == 0.));
    }

    #[test]
    fn augmentation_keeps_the_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        write_gradient(&path, 32, 32);

        let mut preprocessor = Preprocessor::new(planar(24, 24), Some(1));
        let tensor = preprocessor.preprocess(&path, true).unwrap();

        assert_eq!(tensor.shape(), &[24, 24, 1]);
        assert!(tensor.iter().all(|&v| (-1e-6..=1. + 1e-6).contains(&v)));
    }

    #[test]
    fn normalization_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        GrayImage::from_pixel(4, 4, Luma([200])).save(&path).unwrap();

        let mut preprocessor = Preprocessor::new(planar(4, 4), Some(0)).with_normalize(false);
        let tensor = preprocessor.try_preprocess(&path, false).unwrap();

        assert!(tensor.iter().all(|&v| v == 200.));
    }

    #[test]
    fn planar_scan_cannot_fill_a_volume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        write_gradient(&path, 8, 8);

        let target = TargetShape::Volumetric {
            height: 8,
            width: 8,
            depth: 8,
        };
        let mut preprocessor = Preprocessor::new(target, Some(0));

        let err = preprocessor.try_preprocess(&path, false).unwrap_err();
        assert!(matches!(
            err,
            PreprocessErr::IncompatibleTarget {
                scan_dims: 2,
                target_dims: 3
            }
        ));
        assert!(preprocessor.preprocess(&path, false).is_none());
    }

    #[test]
    fn volume_reduces_to_its_central_slice() {
        let volume = Array3::from_shape_fn((2, 2, 5), |(_, _, k)| k as f32);
        let slice = central_slice(&volume);
        assert!(slice.iter().all(|&v| v == 2.));
    }

    #[test]
    fn undecodable_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let mut preprocessor = Preprocessor::new(planar(8, 8), Some(0));
        assert!(preprocessor.preprocess(&path, false).is_none());
    }
}
