#![cfg(test)]

use std::{cell::RefCell, num::NonZeroUsize, rc::Rc};

use ndarray::{Array1, Array4};
use rand::{SeedableRng, rngs::StdRng};
use tempfile::tempdir;

use crate::{
    Network, Result,
    arch::{
        loss::Mse,
        spec::{ActFnSpec, LayerSpec, ModelSpec},
    },
    dataset::Dataset,
    optimization::{Adam, GradientDescent},
    training::{
        Callback, EarlyStopping, EpochLogs, FitControl, ModelCheckpoint, Monitor,
        ReduceLrOnPlateau, Trainer,
    },
};

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

/// y = 2 * x0 - x1 + 0.5, with the two features as channels of a single pixel.
fn linear_dataset() -> Dataset {
    let xs: Vec<[f32; 2]> = (0..16)
        .map(|i| [(i % 4) as f32 * 0.5, (i / 4) as f32 * 0.5])
        .collect();
    let x = Array4::from_shape_fn((16, 1, 1, 2), |(n, _, _, c)| xs[n][c]).into_dyn();
    let y = Array1::from_iter(xs.iter().map(|[a, b]| 2. * a - b + 0.5));

    Dataset::new(x, y).unwrap()
}

fn linear_spec() -> ModelSpec {
    ModelSpec::Sequential {
        layers: vec![
            LayerSpec::GlobalAvgPool,
            LayerSpec::Dense {
                dim: (2, 1),
                act_fn: None,
            },
        ],
    }
}

#[test]
fn gradient_descent_fits_a_linear_function() {
    let mut data = linear_dataset();
    let mut network = Network::new(linear_spec(), vec![1, 1, 2], Some(1)).unwrap();

    let optimizer = GradientDescent::new(0.1);
    let mut trainer = Trainer::new(optimizer, Mse, nz(300), nz(4), StdRng::seed_from_u64(2));
    let history = trainer.fit(&mut network, &mut data, None).unwrap();

    assert_eq!(history.len(), 300);
    assert!(history.last().unwrap().loss < 1e-3);

    let params = network.params();
    assert!((params[0] - 2.).abs() < 0.05);
    assert!((params[1] + 1.).abs() < 0.05);
    assert!((params[2] - 0.5).abs() < 0.05);
}

/// Learns three times the brightness of uniformly lit images.
#[test]
fn adam_fits_a_small_convolutional_network() {
    let levels: Vec<f32> = (0..12).map(|i| i as f32 / 11.).collect();
    let x = Array4::from_shape_fn((12, 6, 6, 1), |(n, _, _, _)| levels[n]).into_dyn();
    let y = Array1::from_iter(levels.iter().map(|l| 3. * l));
    let mut data = Dataset::new(x, y).unwrap();

    let spec = ModelSpec::Sequential {
        layers: vec![
            LayerSpec::Conv {
                in_channels: 1,
                out_channels: 8,
                kernel: [1, 3, 3],
                act_fn: Some(ActFnSpec::Relu),
            },
            LayerSpec::MaxPool { window: [1, 2, 2] },
            LayerSpec::BatchNorm {
                channels: 8,
                momentum: 0.9,
                epsilon: 1e-3,
            },
            LayerSpec::GlobalAvgPool,
            LayerSpec::Dense {
                dim: (8, 8),
                act_fn: Some(ActFnSpec::Relu),
            },
            LayerSpec::Dropout { rate: 0.1 },
            LayerSpec::Dense {
                dim: (8, 1),
                act_fn: None,
            },
        ],
    };

    // A single batch keeps the batch statistics fixed across updates.
    let mut network = Network::new(spec, vec![6, 6, 1], Some(5)).unwrap();
    let optimizer = Adam::with_defaults(network.size(), 0.02);
    let mut trainer = Trainer::new(optimizer, Mse, nz(150), nz(12), StdRng::seed_from_u64(6));
    let history = trainer.fit(&mut network, &mut data, None).unwrap();

    let first = history.epochs()[0].loss;
    let last = history.last().unwrap().loss;
    assert!(last < first / 4., "loss went from {first} to {last}");
}

#[test]
fn fit_with_callbacks_restores_the_best_weights() {
    let dir = tempdir().unwrap();
    let checkpoint = dir.path().join("best.safetensors");

    let mut train = linear_dataset();
    let validation = linear_dataset();
    let mut network = Network::new(linear_spec(), vec![1, 1, 2], Some(1)).unwrap();

    let monitor = Monitor::for_validation(true);
    let optimizer = Adam::with_defaults(network.size(), 0.05);
    let mut trainer = Trainer::new(optimizer, Mse, nz(60), nz(4), StdRng::seed_from_u64(3))
        .with_callback(ModelCheckpoint::new(&checkpoint, monitor))
        .with_callback(ReduceLrOnPlateau::new(monitor, 0.5, 3, 1e-4))
        .with_callback(EarlyStopping::new(monitor, 5, true))
        .with_log_target("fit-test");

    let history = trainer.fit(&mut network, &mut train, Some(&validation)).unwrap();

    let val_loss = history.val_loss().unwrap();
    assert_eq!(val_loss.len(), history.len());

    let best = val_loss.iter().copied().fold(f32::INFINITY, f32::min);
    let restored = network.evaluate(&validation, &Mse).unwrap();
    assert!((restored.loss - best).abs() < 1e-5);

    let mut saved = Network::load(&checkpoint).unwrap();
    assert_eq!(saved.params(), network.params());
    assert!((saved.evaluate(&validation, &Mse).unwrap().loss - best).abs() < 1e-5);
}

/// Records the log target callbacks are handed.
struct TargetRecorder(Rc<RefCell<Vec<String>>>);

impl Callback for TargetRecorder {
    fn on_epoch_end(&mut self, _logs: &EpochLogs, control: &mut FitControl<'_>) -> Result<()> {
        self.0.borrow_mut().push(control.log_target().to_string());
        Ok(())
    }

    fn on_train_end(&mut self, control: &mut FitControl<'_>) -> Result<()> {
        self.0.borrow_mut().push(control.log_target().to_string());
        Ok(())
    }
}

#[test]
fn callbacks_log_under_the_trainer_target() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut data = linear_dataset();
    let mut network = Network::new(linear_spec(), vec![1, 1, 2], Some(1)).unwrap();

    let mut trainer = Trainer::new(GradientDescent::new(0.1), Mse, nz(2), nz(4), StdRng::seed_from_u64(0))
        .with_callback(TargetRecorder(Rc::clone(&seen)))
        .with_log_target("iq_predictor::trainer[2d]");
    trainer.fit(&mut network, &mut data, None).unwrap();

    assert_eq!(*seen.borrow(), vec!["iq_predictor::trainer[2d]"; 3]);
}

#[test]
fn empty_training_data_fails() {
    let x = Array4::<f32>::zeros((0, 1, 1, 2)).into_dyn();
    let mut data = Dataset::new(x, Array1::zeros(0)).unwrap();
    let mut network = Network::new(linear_spec(), vec![1, 1, 2], Some(1)).unwrap();

    let mut trainer = Trainer::new(GradientDescent::new(0.1), Mse, nz(1), nz(1), rand::rng());
    assert!(trainer.fit(&mut network, &mut data, None).is_err());
}
