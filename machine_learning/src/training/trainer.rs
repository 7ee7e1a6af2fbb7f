use std::num::NonZeroUsize;

use log::{debug, info};
use rand::Rng;

use super::{Callback, EpochLogs, FitControl, History, ParamManager};
use crate::{
    MlErr, Network, Result,
    arch::{Model, loss::LossFn},
    dataset::Dataset,
    optimization::Optimizer,
};

/// Fits networks. Contains the relevant components needed for training except for the network
/// itself and its data.
pub struct Trainer<O, L, R>
where
    O: Optimizer,
    L: LossFn,
    R: Rng,
{
    optimizer: O,
    loss_fn: L,
    epochs: NonZeroUsize,
    batch_size: NonZeroUsize,
    rng: R,
    callbacks: Vec<Box<dyn Callback>>,
    log_target: String,
}

impl<O, L, R> Trainer<O, L, R>
where
    O: Optimizer,
    L: LossFn,
    R: Rng,
{
    /// Returns a new `Trainer`.
    ///
    /// # Arguments
    /// * `optimizer` - Dictates how to update the parameters on each batch.
    /// * `loss_fn` - The loss function used to measure the difference between a model's output and the expected one.
    /// * `epochs` - The maximum amount of passes over the training data.
    /// * `batch_size` - The amount of samples per parameter update.
    /// * `rng` - Shuffles the training data on every epoch.
    pub fn new(
        optimizer: O,
        loss_fn: L,
        epochs: NonZeroUsize,
        batch_size: NonZeroUsize,
        rng: R,
    ) -> Self {
        Self {
            optimizer,
            loss_fn,
            epochs,
            batch_size,
            rng,
            callbacks: Vec::new(),
            log_target: module_path!().to_string(),
        }
    }

    /// Adds a callback, callbacks run in the order they were added.
    pub fn with_callback<C: Callback + 'static>(mut self, callback: C) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    /// Sets the target of this trainer's log records.
    pub fn with_log_target(mut self, target: impl Into<String>) -> Self {
        self.log_target = target.into();
        self
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// Fits a network to the training data.
    ///
    /// # Arguments
    /// * `network` - The network to train, its parameters get updated in place.
    /// * `train` - The training data, reshuffled on every epoch.
    /// * `validation` - Data evaluated at the end of every epoch.
    ///
    /// # Returns
    /// The per epoch history or an error if occurred.
    pub fn fit(
        &mut self,
        network: &mut Network,
        train: &mut Dataset,
        validation: Option<&Dataset>,
    ) -> Result<History> {
        if train.is_empty() {
            return Err(MlErr::InvalidInput("there's no training data".into()));
        }

        let target = self.log_target.as_str();
        let epochs = self.epochs.get();
        let mut history = History::new();
        let mut grad = vec![0.; network.size()];

        info!(
            target: target,
            "fitting {} parameters on {} samples for up to {epochs} epochs",
            network.size(),
            train.len()
        );

        for epoch in 1..=epochs {
            let learning_rate = self.optimizer.learning_rate();
            train.shuffle(&mut self.rng);

            let report = {
                let (model, params) = network.parts_mut();
                let (got, expected) = (grad.len(), params.len());
                let mut params =
                    ParamManager::new(params, &mut grad).ok_or(MlErr::SizeMismatch {
                        what: "gradient",
                        got,
                        expected,
                    })?;

                model.backprop(
                    &mut params,
                    &self.loss_fn,
                    &mut self.optimizer,
                    train.batches(self.batch_size),
                )?
            };

            let val_report = validation
                .map(|data| network.evaluate(data, &self.loss_fn))
                .transpose()?;

            let logs = EpochLogs {
                epoch,
                loss: report.loss,
                mae: report.mae,
                val_loss: val_report.map(|r| r.loss),
                val_mae: val_report.map(|r| r.mae),
                learning_rate,
            };

            match val_report {
                Some(val) => info!(
                    target: target,
                    "epoch {epoch}/{epochs}: loss {:.4} mae {:.4} val_loss {:.4} val_mae {:.4}",
                    report.loss, report.mae, val.loss, val.mae
                ),
                None => info!(
                    target: target,
                    "epoch {epoch}/{epochs}: loss {:.4} mae {:.4}", report.loss, report.mae
                ),
            }

            history.push(logs.clone());

            let mut control = FitControl::new(network, learning_rate).with_log_target(target);
            for callback in &mut self.callbacks {
                callback.on_epoch_end(&logs, &mut control)?;
            }

            if control.learning_rate() != learning_rate {
                debug!(target: target, epoch = epoch; "learning rate set to {}", control.learning_rate());
                self.optimizer.set_learning_rate(control.learning_rate());
            }

            if control.stop_requested() {
                info!(target: target, "stopping early after epoch {epoch}");
                break;
            }
        }

        let mut control =
            FitControl::new(network, self.optimizer.learning_rate()).with_log_target(target);
        for callback in &mut self.callbacks {
            callback.on_train_end(&mut control)?;
        }

        Ok(history)
    }
}
