use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use evaluation::{Metrics, calculate_regression_metrics, plots::plot_training_curves};
use log::{debug, error, info, warn};
use machine_learning::{
    Network,
    arch::loss::Mse,
    optimization::Adam,
    training::{EarlyStopping, History, ModelCheckpoint, Monitor, ReduceLrOnPlateau, Trainer},
};
use preprocessing::{LABELS_FILE, Preprocessor, discover_images, read_labels};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    config::{ArchConfig, ModelKind},
    data::LabeledData,
    error::{IqErr, Result},
    model::{build_spec, validate_input_shape},
};

pub const MODEL_EXTENSION: &str = "safetensors";
pub const MODEL_FILE: &str = "mri_iq_model.safetensors";
pub const BEST_MODEL_FILE: &str = "best_model.safetensors";

/// Seeds the validation split carved out of the training data.
const VALIDATION_SEED: u64 = 42;
const LR_FACTOR: f32 = 0.5;
const LR_PATIENCE: usize = 10;
const MIN_LR: f32 = 1e-7;
const STOP_PATIENCE: usize = 20;

/// How far an `IqTrainer` has come.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrainerState {
    Uninitialized,
    DataLoaded,
    ModelCreated,
    Fitted,
    Evaluated,
}

/// Loads labeled scans and fits, evaluates and stores IQ regressors.
pub struct IqTrainer {
    kind: ModelKind,
    input_shape: Vec<usize>,
    save_dir: PathBuf,
    arch: ArchConfig,
    preprocessor: Preprocessor,
    network: Option<Network>,
    history: Option<History>,
    seed: Option<u64>,
    state: TrainerState,
    log_target: String,
}

impl IqTrainer {
    /// Creates a new `IqTrainer`, creating `save_dir` if missing.
    ///
    /// # Arguments
    /// * `kind` - Whether to work on images or volumes.
    /// * `input_shape` - The channel-last sample shape, the kind's default if `None`.
    /// * `save_dir` - Where models, checkpoints and plots are written.
    /// * `seed` - Seeds initialization, shuffling and augmentation; random if `None`.
    pub fn new(
        kind: ModelKind,
        input_shape: Option<Vec<usize>>,
        save_dir: impl Into<PathBuf>,
        seed: Option<u64>,
    ) -> Result<Self> {
        let input_shape = input_shape.unwrap_or_else(|| kind.default_input_shape());
        let target = kind.target_shape(&input_shape)?;
        let save_dir = save_dir.into();
        fs::create_dir_all(&save_dir)?;

        let log_target = format!("iq_predictor::trainer[{kind}]");
        let preprocessor =
            Preprocessor::new(target, seed).with_log_target(format!("{log_target}::preprocessing"));

        Ok(Self {
            kind,
            input_shape,
            save_dir,
            arch: ArchConfig::for_kind(kind),
            preprocessor,
            network: None,
            history: None,
            seed,
            state: TrainerState::Uninitialized,
            log_target,
        })
    }

    /// Replaces the stock architecture of the kind.
    pub fn with_arch(mut self, arch: ArchConfig) -> Self {
        self.arch = arch;
        self
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn arch(&self) -> &ArchConfig {
        &self.arch
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn network(&self) -> Option<&Network> {
        self.network.as_ref()
    }

    pub fn history(&self) -> Option<&History> {
        self.history.as_ref()
    }

    fn advance(&mut self, state: TrainerState) {
        self.state = self.state.max(state);
    }

    /// Loads the scans of a directory that have a score in the label file.
    ///
    /// Scans without a label are dropped, as are scans that fail to preprocess.
    ///
    /// # Arguments
    /// * `data_dir` - The directory holding the scans.
    /// * `labels` - The `filename,score` file, `data_dir/iq_labels.txt` if `None`.
    ///
    /// # Returns
    /// The labeled samples in file name order, or an error if none could be loaded.
    pub fn load_data(&mut self, data_dir: &Path, labels: Option<&Path>) -> Result<LabeledData> {
        let images = discover_images(data_dir)?;
        info!(
            target: self.log_target.as_str(),
            "found {} image files in {}",
            images.len(),
            data_dir.display()
        );

        let labels_path = labels
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_dir.join(LABELS_FILE));
        if !labels_path.is_file() {
            return Err(IqErr::NoData(format!(
                "the label file {} doesn't exist",
                labels_path.display()
            )));
        }

        let scores = read_labels(&labels_path)?;
        let matched: Vec<_> = images
            .into_iter()
            .filter_map(|path| {
                let score = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .and_then(|name| scores.get(name).copied());

                if score.is_none() {
                    debug!(target: self.log_target.as_str(), "no label for {}", path.display());
                }

                score.map(|score| (path, score))
            })
            .collect();
        info!(target: self.log_target.as_str(), "matched {} images with labels", matched.len());

        let mut data = LabeledData::default();
        for (path, score) in matched {
            if let Some(tensor) = self.preprocessor.preprocess(&path, false) {
                data.push(path, tensor, score);
            }
        }

        if data.is_empty() {
            return Err(IqErr::NoData(format!(
                "no labeled scans could be loaded from {}",
                data_dir.display()
            )));
        }

        info!(target: self.log_target.as_str(), "successfully loaded {} samples", data.len());
        self.advance(TrainerState::DataLoaded);
        Ok(data)
    }

    /// Builds a fresh model, replacing the current one.
    ///
    /// # Arguments
    /// * `learning_rate` - Overrides the configured learning rate.
    /// * `dropout_rate` - Overrides the configured dropout rate.
    pub fn create_model(
        &mut self,
        learning_rate: Option<f32>,
        dropout_rate: Option<f32>,
    ) -> Result<&Network> {
        let mut arch = self.arch.clone();
        if let Some(learning_rate) = learning_rate {
            arch.learning_rate = learning_rate;
        }
        if let Some(dropout_rate) = dropout_rate {
            arch.dropout_rate = dropout_rate;
        }

        arch.validate()?;
        validate_input_shape(self.kind, &self.input_shape, &arch)?;
        self.arch = arch;

        let spec = build_spec(self.kind, &self.arch);
        let network = Network::new(spec, self.input_shape.clone(), self.seed)?;
        info!(
            target: self.log_target.as_str(),
            "created a {} model with input shape {:?} and {} parameters",
            self.kind,
            self.input_shape,
            network.size()
        );

        self.history = None;
        self.advance(TrainerState::ModelCreated);
        Ok(&*self.network.insert(network))
    }

    /// Fits the model, creating one with the configured hyperparameters if needed.
    ///
    /// The best model seen is checkpointed to `save_dir/best_model.safetensors`,
    /// the learning rate halves after 10 epochs without improvement and the fit
    /// stops after 20, keeping the weights of the best epoch.
    ///
    /// # Arguments
    /// * `train` - The training samples.
    /// * `validation` - The validation samples. If `None`, `validation_split` of
    ///   `train` is held out instead.
    /// * `epochs` - The maximum amount of epochs.
    /// * `batch_size` - The amount of samples per update.
    /// * `validation_split` - The fraction held out when there's no validation data, 0 for none.
    ///
    /// # Returns
    /// The history of the fit.
    pub fn train(
        &mut self,
        train: &LabeledData,
        validation: Option<&LabeledData>,
        epochs: usize,
        batch_size: usize,
        validation_split: f32,
    ) -> Result<&History> {
        let epochs = NonZeroUsize::new(epochs)
            .ok_or_else(|| IqErr::InvalidConfig("the amount of epochs should be positive".into()))?;
        let batch_size = NonZeroUsize::new(batch_size)
            .ok_or_else(|| IqErr::InvalidConfig("the batch size should be positive".into()))?;

        let (train, validation) = match validation {
            Some(validation) => (train.clone(), Some(validation.clone())),
            None if validation_split > 0. => {
                let (train, validation) = train.split(validation_split, VALIDATION_SEED)?;
                (train, Some(validation))
            }
            None => (train.clone(), None),
        };

        let mut train_set = train.to_dataset()?;
        let validation_set = validation
            .as_ref()
            .filter(|v| !v.is_empty())
            .map(LabeledData::to_dataset)
            .transpose()?;

        if self.network.is_none() {
            self.create_model(None, None)?;
        }
        let Some(network) = self.network.as_mut() else {
            return Err(IqErr::NotReady("the model couldn't be created"));
        };

        let monitor = Monitor::for_validation(validation_set.is_some());
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut trainer = Trainer::new(
            Adam::with_defaults(network.size(), self.arch.learning_rate),
            Mse::new(),
            epochs,
            batch_size,
            rng,
        )
        .with_callback(ModelCheckpoint::new(self.save_dir.join(BEST_MODEL_FILE), monitor))
        .with_callback(ReduceLrOnPlateau::new(monitor, LR_FACTOR, LR_PATIENCE, MIN_LR))
        .with_callback(EarlyStopping::new(monitor, STOP_PATIENCE, true))
        .with_log_target(self.log_target.as_str());

        info!(
            target: self.log_target.as_str(),
            "training on {} samples, validating on {}",
            train.len(),
            validation_set.as_ref().map_or(0, |v| v.len())
        );
        let history = trainer.fit(network, &mut train_set, validation_set.as_ref())?;
        info!(target: self.log_target.as_str(), "training finished after {} epochs", history.len());

        self.advance(TrainerState::Fitted);
        Ok(&*self.history.insert(history))
    }

    /// Predicts the score of every sample.
    pub fn predict(&mut self, data: &LabeledData) -> Result<Vec<f32>> {
        let network = self
            .network
            .as_mut()
            .ok_or(IqErr::NotReady("there's no model to predict with"))?;

        Ok(network.predict(data.stacked()?)?.to_vec())
    }

    /// Scores the model on held out samples.
    ///
    /// # Returns
    /// The metrics, or `None` if there's no model or the samples couldn't be scored.
    pub fn evaluate(&mut self, test: &LabeledData) -> Option<Metrics> {
        if self.network.is_none() {
            error!(target: self.log_target.as_str(), "there's no trained or loaded model to evaluate");
            return None;
        }

        let metrics = self
            .predict(test)
            .and_then(|y_pred| Ok(calculate_regression_metrics(&test.labels, &y_pred)?));

        match metrics {
            Ok(metrics) => {
                info!(
                    target: self.log_target.as_str(),
                    mae = metrics.mae, rmse = metrics.rmse, r2 = metrics.r2;
                    "evaluated on {} samples: MAE {:.2}, MSE {:.2}, RMSE {:.2}, R² {:.3}",
                    test.len(),
                    metrics.mae,
                    metrics.mse,
                    metrics.rmse,
                    metrics.r2
                );
                self.advance(TrainerState::Evaluated);
                Some(metrics)
            }
            Err(e) => {
                error!(target: self.log_target.as_str(), "evaluation failed: {e}");
                None
            }
        }
    }

    /// Writes the model.
    ///
    /// # Arguments
    /// * `path` - The artifact path, `save_dir/mri_iq_model.safetensors` if `None`.
    ///   Any other extension is replaced by `.safetensors`.
    ///
    /// # Returns
    /// The path written.
    pub fn save_model(&self, path: Option<&Path>) -> Result<PathBuf> {
        let network = self
            .network
            .as_ref()
            .ok_or(IqErr::NotReady("there's no model to save"))?;

        let mut path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.save_dir.join(MODEL_FILE));
        if path.extension().is_none_or(|ext| ext != MODEL_EXTENSION) {
            path.set_extension(MODEL_EXTENSION);
        }

        network.save(&path)?;
        info!(target: self.log_target.as_str(), "model saved to {}", path.display());
        Ok(path)
    }

    /// Replaces the model with a saved one.
    ///
    /// The trainer adopts the input shape of the loaded model.
    pub fn load_model(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            error!(target: self.log_target.as_str(), "model file not found: {}", path.display());
            return Err(IqErr::ModelNotFound(path.to_path_buf()));
        }

        let network = Network::load(path)?;
        let target = self.kind.target_shape(network.input_shape())?;

        if network.input_shape() != self.input_shape.as_slice() {
            warn!(
                target: self.log_target.as_str(),
                "the loaded model expects {:?} instead of {:?}",
                network.input_shape(),
                self.input_shape
            );
            self.input_shape = network.input_shape().to_vec();
            self.preprocessor = Preprocessor::new(target, self.seed)
                .with_log_target(format!("{}::preprocessing", self.log_target));
        }

        info!(target: self.log_target.as_str(), "model loaded from {}", path.display());
        self.network = Some(network);
        self.history = None;
        self.advance(TrainerState::ModelCreated);
        Ok(())
    }

    /// Plots the loss and MAE curves of the last fit.
    ///
    /// # Returns
    /// Whether there was a history to plot.
    pub fn plot_training_history(&self, path: &Path) -> Result<bool> {
        let Some(history) = &self.history else {
            warn!(target: self.log_target.as_str(), "no training history available");
            return Ok(false);
        };

        let val_loss = history.val_loss().filter(|v| !v.is_empty());
        let val_mae = history.val_mae().filter(|v| !v.is_empty());

        plot_training_curves(
            path,
            &history.loss(),
            val_loss.as_deref(),
            &history.mae(),
            val_mae.as_deref(),
        )?;

        info!(target: self.log_target.as_str(), "training history plot saved to {}", path.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array3;

    use super::*;

    fn tiny_arch() -> ArchConfig {
        ArchConfig {
            conv_widths: vec![2],
            final_conv: None,
            dense_widths: vec![4],
            dropout_rate: 0.,
            learning_rate: 1e-2,
            batch_norm_momentum: 0.9,
            batch_norm_epsilon: 1e-3,
        }
    }

    fn tiny_data(n: usize) -> LabeledData {
        let mut data = LabeledData::default();
        for i in 0..n {
            let level = i as f32 / n as f32;
            data.push(
                PathBuf::from(format!("scan_{i}.png")),
                Array3::from_elem((8, 8, 1), level).into_dyn(),
                90. + 20. * level,
            );
        }

        data
    }

    #[test]
    fn bad_input_shapes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(IqTrainer::new(ModelKind::Planar, Some(vec![8, 8, 8, 1]), dir.path(), None).is_err());
        assert!(IqTrainer::new(ModelKind::Volumetric, Some(vec![8, 8, 1]), dir.path(), None).is_err());
    }

    #[test]
    fn nothing_to_save_or_evaluate_without_a_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = IqTrainer::new(ModelKind::Planar, Some(vec![8, 8, 1]), dir.path(), Some(0)).unwrap();

        assert!(matches!(trainer.save_model(None), Err(IqErr::NotReady(_))));
        assert!(trainer.evaluate(&tiny_data(2)).is_none());
        assert!(!trainer.plot_training_history(&dir.path().join("h.png")).unwrap());
        assert_eq!(trainer.state(), TrainerState::Uninitialized);
    }

    #[test]
    fn training_walks_through_the_states() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = IqTrainer::new(ModelKind::Planar, Some(vec![8, 8, 1]), dir.path(), Some(7))
            .unwrap()
            .with_arch(tiny_arch());

        let data = tiny_data(10);
        let history = trainer.train(&data, None, 3, 4, 0.2).unwrap();

        assert!(!history.is_empty() && history.len() <= 3);
        assert!(history.val_loss().is_some());
        assert_eq!(trainer.state(), TrainerState::Fitted);
        assert!(dir.path().join(BEST_MODEL_FILE).is_file());

        let metrics = trainer.evaluate(&data).unwrap();
        assert!(metrics.mae.is_finite());
        assert_eq!(trainer.state(), TrainerState::Evaluated);

        assert!(trainer.plot_training_history(&dir.path().join("history.png")).unwrap());
        assert!(dir.path().join("history.png").is_file());
    }

    #[test]
    fn saved_models_get_the_artifact_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = IqTrainer::new(ModelKind::Planar, Some(vec![8, 8, 1]), dir.path(), Some(1))
            .unwrap()
            .with_arch(tiny_arch());
        trainer.create_model(None, None).unwrap();

        let path = trainer.save_model(Some(&dir.path().join("model.h5"))).unwrap();
        assert_eq!(path, dir.path().join("model.safetensors"));

        let path = trainer.save_model(None).unwrap();
        assert_eq!(path, dir.path().join(MODEL_FILE));
        assert!(path.is_file());
    }

    #[test]
    fn create_model_applies_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = IqTrainer::new(ModelKind::Planar, Some(vec![8, 8, 1]), dir.path(), Some(1))
            .unwrap()
            .with_arch(tiny_arch());

        trainer.create_model(Some(5e-4), Some(0.5)).unwrap();
        assert_eq!(trainer.arch().learning_rate, 5e-4);
        assert_eq!(trainer.arch().dropout_rate, 0.5);

        assert!(trainer.create_model(None, Some(1.5)).is_err());
    }

    #[test]
    fn loading_a_missing_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = IqTrainer::new(ModelKind::Planar, None, dir.path(), None).unwrap();

        assert!(matches!(
            trainer.load_model(&dir.path().join("missing.safetensors")),
            Err(IqErr::ModelNotFound(_))
        ));
    }
}
