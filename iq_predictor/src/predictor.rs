use std::path::{Path, PathBuf};

use evaluation::plots::{Plane, plot_scan_prediction};
use log::{error, info, warn};
use machine_learning::Network;
use ndarray::{Array2, ArrayViewD, Axis, Ix2};
use preprocessing::{Preprocessor, Scan, load_scan};

use crate::{
    config::{ArchConfig, ModelKind},
    data::stack_samples,
    error::{IqErr, Result},
    model::{build_spec, validate_input_shape},
    trainer::MODEL_EXTENSION,
};

/// Predicts IQ scores of scan files with a saved model.
pub struct IqPredictor {
    kind: ModelKind,
    network: Network,
    trained: bool,
    preprocessor: Preprocessor,
    log_target: String,
}

impl IqPredictor {
    /// Loads the model at `model_path`.
    ///
    /// If the path doesn't exist the same path with the `.safetensors`
    /// extension is tried. If that fails too, or the file can't be read, an
    /// untrained model of the stock architecture is used instead and a
    /// warning is logged.
    ///
    /// # Arguments
    /// * `model_path` - The saved model.
    /// * `kind` - Whether the model works on images or volumes.
    /// * `input_shape` - The input shape of the untrained fallback, the kind's default if `None`.
    /// * `seed` - Seeds the untrained fallback.
    pub fn new(
        model_path: &Path,
        kind: ModelKind,
        input_shape: Option<Vec<usize>>,
        seed: Option<u64>,
    ) -> Result<Self> {
        let log_target = format!("iq_predictor::predictor[{kind}]");

        let (network, trained) = match load_network(model_path, kind, &log_target) {
            Some(network) => (network, true),
            None => {
                let input_shape = input_shape.unwrap_or_else(|| kind.default_input_shape());
                let arch = ArchConfig::for_kind(kind);
                validate_input_shape(kind, &input_shape, &arch)?;

                info!(target: log_target.as_str(), "creating a default {kind} model");
                let network = Network::new(build_spec(kind, &arch), input_shape, seed)?;
                warn!(target: log_target.as_str(), "using an untrained model, predictions will be random");
                (network, false)
            }
        };

        let target = kind.target_shape(network.input_shape())?;
        let preprocessor =
            Preprocessor::new(target, seed).with_log_target(format!("{log_target}::preprocessing"));

        Ok(Self {
            kind,
            network,
            trained,
            preprocessor,
            log_target,
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Whether the predictions come from a saved model.
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn input_shape(&self) -> &[usize] {
        self.network.input_shape()
    }

    /// Predicts the score of a single scan.
    ///
    /// # Returns
    /// The score, or `None` if the scan couldn't be preprocessed or scored.
    pub fn predict_single(&mut self, path: &Path) -> Option<f32> {
        let Some(tensor) = self.preprocessor.preprocess(path, false) else {
            error!(target: self.log_target.as_str(), "failed to preprocess {}", path.display());
            return None;
        };

        match self.network.predict(tensor.insert_axis(Axis(0))) {
            Ok(scores) => {
                let score = scores[0];
                info!(target: self.log_target.as_str(), "predicted IQ for {}: {score:.1}", path.display());
                Some(score)
            }
            Err(e) => {
                error!(target: self.log_target.as_str(), "prediction failed for {}: {e}", path.display());
                None
            }
        }
    }

    /// Predicts the scores of many scans, skipping the ones that fail to preprocess.
    ///
    /// # Returns
    /// Every scored scan with its score in input order, or `None` if nothing could be scored.
    pub fn predict_batch<P: AsRef<Path>>(&mut self, paths: &[P]) -> Option<Vec<(PathBuf, f32)>> {
        let processed = self.preprocessor.preprocess_batch(paths, false);
        if processed.is_empty() {
            error!(target: self.log_target.as_str(), "no valid images to process");
            return None;
        }

        let (paths, tensors): (Vec<_>, Vec<_>) =
            processed.into_iter().map(|p| (p.path, p.tensor)).unzip();

        let scores = stack_samples(&tensors)
            .and_then(|batch| Ok(self.network.predict(batch)?));

        match scores {
            Ok(scores) => {
                let results: Vec<_> = paths.into_iter().zip(scores).collect();
                for (path, score) in &results {
                    info!(target: self.log_target.as_str(), "predicted IQ for {}: {score:.1}", path.display());
                }
                Some(results)
            }
            Err(e) => {
                error!(target: self.log_target.as_str(), "batch prediction failed: {e}");
                None
            }
        }
    }

    /// Draws a scan next to its preprocessed version together with the
    /// predicted score. Volumes are shown by their central depth slice.
    ///
    /// # Arguments
    /// * `path` - The scan.
    /// * `out` - The PNG to write.
    ///
    /// # Returns
    /// The predicted score.
    pub fn visualize_prediction(&mut self, path: &Path, out: &Path) -> Result<f32> {
        let tensor = self.preprocessor.try_preprocess(path, false)?;
        let score = self.network.predict(tensor.clone().insert_axis(Axis(0)))?[0];

        let original = match load_scan(path)? {
            Scan::Planar(image) => image,
            Scan::Volumetric(volume) => central_plane(volume.view().into_dyn())?,
        };
        let processed = central_plane(tensor.index_axis(Axis(tensor.ndim() - 1), 0))?;

        let original = original.as_standard_layout();
        let processed = processed.as_standard_layout();
        let (Some(original_pixels), Some(processed_pixels)) = (original.as_slice(), processed.as_slice())
        else {
            return Err(IqErr::InvalidConfig("scan planes should be contiguous".into()));
        };

        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        plot_scan_prediction(
            out,
            &name,
            Plane {
                pixels: original_pixels,
                width: original.ncols(),
            },
            Plane {
                pixels: processed_pixels,
                width: processed.ncols(),
            },
            score,
        )?;

        info!(target: self.log_target.as_str(), "visualization of {} saved to {}", path.display(), out.display());
        Ok(score)
    }
}

/// Tries the path and then the path with the artifact extension.
fn load_network(model_path: &Path, kind: ModelKind, log_target: &str) -> Option<Network> {
    let swapped = model_path.with_extension(MODEL_EXTENSION);
    let candidates = [model_path, swapped.as_path()];

    let Some(path) = candidates.into_iter().find(|p| p.exists()) else {
        error!(target: log_target, "model file not found: {}", model_path.display());
        return None;
    };

    let network = Network::load(path)
        .map_err(IqErr::from)
        .and_then(|network| {
            kind.target_shape(network.input_shape())?;
            Ok(network)
        });

    match network {
        Ok(network) => {
            info!(target: log_target, "model loaded from {}", path.display());
            Some(network)
        }
        Err(e) => {
            error!(target: log_target, "failed to load the model at {}: {e}", path.display());
            None
        }
    }
}

/// Reduces `[h, w]` or `[h, w, d]` data to an `[h, w]` plane, taking the
/// central depth slice of volumes.
fn central_plane(data: ArrayViewD<'_, f32>) -> Result<Array2<f32>> {
    let plane = match data.ndim() {
        3 => {
            let depth = data.len_of(Axis(2));
            data.index_axis(Axis(2), depth / 2).to_owned()
        }
        _ => data.to_owned(),
    };

    plane
        .into_dimensionality::<Ix2>()
        .map_err(|e| IqErr::InvalidConfig(format!("can't show data of shape {:?}: {e}", data.shape())))
}

#[cfg(test)]
mod tests {
    use ndarray::Array3;

    use super::*;

    #[test]
    fn central_plane_of_a_volume() {
        let volume = Array3::from_shape_fn((2, 3, 5), |(_, _, k)| k as f32).into_dyn();

        let plane = central_plane(volume.view()).unwrap();
        assert_eq!(plane.dim(), (2, 3));
        assert!(plane.iter().all(|&v| v == 2.));
    }

    #[test]
    fn planes_pass_through() {
        let image = Array2::from_shape_fn((2, 3), |(i, j)| (i * 3 + j) as f32).into_dyn();
        assert_eq!(central_plane(image.view()).unwrap()[[1, 2]], 5.);
    }

    #[test]
    fn missing_model_falls_back_to_an_untrained_one() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = IqPredictor::new(
            &dir.path().join("missing.bin"),
            ModelKind::Planar,
            Some(vec![16, 16, 1]),
            Some(0),
        )
        .unwrap();

        assert!(!predictor.is_trained());
        assert_eq!(predictor.input_shape(), &[16, 16, 1]);
    }

    #[test]
    fn garbage_model_falls_back_to_an_untrained_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        std::fs::write(&path, b"not a model").unwrap();

        let predictor = IqPredictor::new(&path, ModelKind::Planar, Some(vec![16, 16, 1]), Some(0)).unwrap();
        assert!(!predictor.is_trained());
    }
}
