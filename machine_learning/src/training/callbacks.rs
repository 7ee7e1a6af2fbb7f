use std::path::PathBuf;

use log::{info, warn};

use super::EpochLogs;
use crate::{Network, Result};

/// The quantity a callback watches. Lower is better for both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Monitor {
    Loss,
    ValLoss,
}

impl Monitor {
    /// Watches the validation loss when there's validation data, the training loss otherwise.
    pub fn for_validation(has_validation: bool) -> Self {
        if has_validation {
            Self::ValLoss
        } else {
            Self::Loss
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Loss => "loss",
            Self::ValLoss => "val_loss",
        }
    }

    pub fn value(&self, logs: &EpochLogs) -> Option<f32> {
        match self {
            Self::Loss => Some(logs.loss),
            Self::ValLoss => logs.val_loss,
        }
    }

    fn value_or_warn(&self, logs: &EpochLogs, log_target: &str) -> Option<f32> {
        let value = self.value(logs);
        if value.is_none() {
            warn!(target: log_target, "`{}` isn't available, skipping its callbacks", self.name());
        }

        value
    }
}

/// What callbacks may see and change while a fit is running.
pub struct FitControl<'a> {
    network: &'a mut Network,
    learning_rate: f32,
    stop: bool,
    log_target: &'a str,
}

impl<'a> FitControl<'a> {
    pub fn new(network: &'a mut Network, learning_rate: f32) -> Self {
        Self {
            network,
            learning_rate,
            stop: false,
            log_target: module_path!(),
        }
    }

    /// Sets the target callbacks log under, the fitting trainer's own.
    pub fn with_log_target(mut self, log_target: &'a str) -> Self {
        self.log_target = log_target;
        self
    }

    pub fn log_target(&self) -> &'a str {
        self.log_target
    }

    pub fn network(&self) -> &Network {
        &*self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut *self.network
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    /// Asks the fit to end after the current epoch.
    pub fn request_stop(&mut self) {
        self.stop = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop
    }
}

/// Hooks into the fit loop.
pub trait Callback {
    fn on_epoch_end(&mut self, logs: &EpochLogs, control: &mut FitControl<'_>) -> Result<()>;

    fn on_train_end(&mut self, _control: &mut FitControl<'_>) -> Result<()> {
        Ok(())
    }
}

/// Saves the network whenever the monitored quantity improves.
pub struct ModelCheckpoint {
    path: PathBuf,
    monitor: Monitor,
    best: f32,
}

impl ModelCheckpoint {
    pub fn new(path: impl Into<PathBuf>, monitor: Monitor) -> Self {
        Self {
            path: path.into(),
            monitor,
            best: f32::INFINITY,
        }
    }
}

impl Callback for ModelCheckpoint {
    fn on_epoch_end(&mut self, logs: &EpochLogs, control: &mut FitControl<'_>) -> Result<()> {
        let Some(current) = self.monitor.value_or_warn(logs, control.log_target()) else {
            return Ok(());
        };

        if current < self.best {
            info!(
                target: control.log_target(),
                "epoch {}: {} improved from {:.5} to {:.5}, saving model to {}",
                logs.epoch,
                self.monitor.name(),
                self.best,
                current,
                self.path.display()
            );

            self.best = current;
            control.network().save(&self.path)?;
        }

        Ok(())
    }
}

/// Scales the learning rate down once the monitored quantity stops improving for a while.
pub struct ReduceLrOnPlateau {
    monitor: Monitor,
    factor: f32,
    patience: usize,
    min_lr: f32,
    min_delta: f32,
    best: f32,
    wait: usize,
}

impl ReduceLrOnPlateau {
    /// Creates a new `ReduceLrOnPlateau`.
    ///
    /// # Arguments
    /// * `monitor` - The quantity to watch.
    /// * `factor` - Multiplies the learning rate on every reduction.
    /// * `patience` - The amount of epochs without improvement before a reduction.
    /// * `min_lr` - The learning rate is never reduced below this.
    pub fn new(monitor: Monitor, factor: f32, patience: usize, min_lr: f32) -> Self {
        Self {
            monitor,
            factor,
            patience,
            min_lr,
            min_delta: 1e-4,
            best: f32::INFINITY,
            wait: 0,
        }
    }
}

impl Callback for ReduceLrOnPlateau {
    fn on_epoch_end(&mut self, logs: &EpochLogs, control: &mut FitControl<'_>) -> Result<()> {
        let Some(current) = self.monitor.value_or_warn(logs, control.log_target()) else {
            return Ok(());
        };

        if current < self.best - self.min_delta {
            self.best = current;
            self.wait = 0;
            return Ok(());
        }

        self.wait += 1;
        if self.wait < self.patience {
            return Ok(());
        }

        let old_lr = control.learning_rate();
        if old_lr > self.min_lr {
            let new_lr = (old_lr * self.factor).max(self.min_lr);
            control.set_learning_rate(new_lr);
            info!(target: control.log_target(), "epoch {}: reducing learning rate to {new_lr:e}", logs.epoch);
        }

        self.wait = 0;
        Ok(())
    }
}

/// Ends the fit once the monitored quantity stops improving, optionally restoring the network
/// to its best epoch when the fit ends.
pub struct EarlyStopping {
    monitor: Monitor,
    patience: usize,
    restore_best_weights: bool,
    best: f32,
    wait: usize,
    best_state: Option<(Vec<f32>, Vec<f32>)>,
}

impl EarlyStopping {
    pub fn new(monitor: Monitor, patience: usize, restore_best_weights: bool) -> Self {
        Self {
            monitor,
            patience,
            restore_best_weights,
            best: f32::INFINITY,
            wait: 0,
            best_state: None,
        }
    }
}

impl Callback for EarlyStopping {
    fn on_epoch_end(&mut self, logs: &EpochLogs, control: &mut FitControl<'_>) -> Result<()> {
        let Some(current) = self.monitor.value_or_warn(logs, control.log_target()) else {
            return Ok(());
        };

        self.wait += 1;

        if current < self.best {
            self.best = current;
            self.wait = 0;

            if self.restore_best_weights {
                let network = control.network();
                self.best_state = Some((network.params().to_vec(), network.buffers()));
            }
        }

        if self.wait >= self.patience && logs.epoch > 1 {
            info!(
                target: control.log_target(),
                "epoch {}: no improvement of {} in {} epochs, stopping",
                logs.epoch,
                self.monitor.name(),
                self.wait
            );
            control.request_stop();
        }

        Ok(())
    }

    fn on_train_end(&mut self, control: &mut FitControl<'_>) -> Result<()> {
        let Some((params, buffers)) = self.best_state.take() else {
            return Ok(());
        };

        info!(target: control.log_target(), "restoring the weights of the best epoch");
        control.network_mut().set_state(params, &buffers)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::arch::spec::{LayerSpec, ModelSpec};

    fn network() -> Network {
        let spec = ModelSpec::Sequential {
            layers: vec![
                LayerSpec::GlobalAvgPool,
                LayerSpec::Dense {
                    dim: (1, 1),
                    act_fn: None,
                },
            ],
        };

        Network::new(spec, vec![1, 1, 1], Some(0)).unwrap()
    }

    fn logs(epoch: usize, loss: f32) -> EpochLogs {
        EpochLogs {
            epoch,
            loss,
            mae: loss,
            val_loss: None,
            val_mae: None,
            learning_rate: 0.1,
        }
    }

    #[test]
    fn early_stopping_stops_and_restores_the_best_epoch() {
        let mut network = network();
        let mut callback = EarlyStopping::new(Monitor::Loss, 2, true);

        for (epoch, loss) in [3., 2., 2.5, 2.6].into_iter().enumerate() {
            network.set_state(vec![epoch as f32, 0.], &[]).unwrap();
            let mut control = FitControl::new(&mut network, 0.1);
            callback.on_epoch_end(&logs(epoch + 1, loss), &mut control).unwrap();

            assert_eq!(control.stop_requested(), epoch == 3);
        }

        let mut control = FitControl::new(&mut network, 0.1);
        callback.on_train_end(&mut control).unwrap();
        assert_eq!(network.params(), [1., 0.]);
    }

    #[test]
    fn plateau_halves_the_learning_rate_down_to_the_minimum() {
        let mut network = network();
        let mut callback = ReduceLrOnPlateau::new(Monitor::Loss, 0.5, 2, 0.03);
        let mut learning_rate = 0.1;
        let mut rates = Vec::new();

        for epoch in 1..=7 {
            let mut control = FitControl::new(&mut network, learning_rate);
            callback.on_epoch_end(&logs(epoch, 1.), &mut control).unwrap();
            learning_rate = control.learning_rate();
            rates.push(learning_rate);
        }

        assert_eq!(rates, [0.1, 0.1, 0.05, 0.05, 0.03, 0.03, 0.03]);
    }

    #[test]
    fn small_improvements_count_as_plateau() {
        let mut network = network();
        let mut callback = ReduceLrOnPlateau::new(Monitor::Loss, 0.5, 1, 0.);

        let mut control = FitControl::new(&mut network, 0.1);
        callback.on_epoch_end(&logs(1, 1.), &mut control).unwrap();
        callback.on_epoch_end(&logs(2, 1. - 1e-5), &mut control).unwrap();

        assert_eq!(control.learning_rate(), 0.05);
    }

    #[test]
    fn checkpoint_saves_only_improvements() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("best.safetensors");
        let mut network = network();
        let mut callback = ModelCheckpoint::new(&path, Monitor::Loss);

        network.set_state(vec![1., 1.], &[]).unwrap();
        let mut control = FitControl::new(&mut network, 0.1);
        callback.on_epoch_end(&logs(1, 2.), &mut control).unwrap();

        control.network_mut().set_state(vec![2., 2.], &[]).unwrap();
        callback.on_epoch_end(&logs(2, 3.), &mut control).unwrap();
        assert_eq!(Network::load(&path).unwrap().params(), [1., 1.]);

        control.network_mut().set_state(vec![3., 3.], &[]).unwrap();
        callback.on_epoch_end(&logs(3, 1.), &mut control).unwrap();
        assert_eq!(Network::load(&path).unwrap().params(), [3., 3.]);
    }

    #[test]
    fn missing_validation_loss_is_skipped() {
        let mut network = network();
        let mut callback = EarlyStopping::new(Monitor::ValLoss, 1, false);

        for epoch in 1..=3 {
            let mut control = FitControl::new(&mut network, 0.1);
            callback.on_epoch_end(&logs(epoch, 1.), &mut control).unwrap();
            assert!(!control.stop_requested());
        }
    }
}
