use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::Result;

/// What happened during a single epoch of a fit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs {
    pub epoch: usize,
    pub loss: f32,
    pub mae: f32,
    pub val_loss: Option<f32>,
    pub val_mae: Option<f32>,
    pub learning_rate: f32,
}

/// The per epoch record of a fit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    epochs: Vec<EpochLogs>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, logs: EpochLogs) {
        self.epochs.push(logs);
    }

    pub fn epochs(&self) -> &[EpochLogs] {
        &self.epochs
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochLogs> {
        self.epochs.last()
    }

    pub fn loss(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.loss).collect()
    }

    pub fn mae(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.mae).collect()
    }

    /// The validation loss per epoch, `None` if the fit had no validation data.
    pub fn val_loss(&self) -> Option<Vec<f32>> {
        self.epochs.iter().map(|e| e.val_loss).collect()
    }

    /// The validation mean absolute error per epoch, `None` if the fit had no validation data.
    pub fn val_mae(&self) -> Option<Vec<f32>> {
        self.epochs.iter().map(|e| e.val_mae).collect()
    }

    /// Writes the history as pretty JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logs(epoch: usize, val_loss: Option<f32>) -> EpochLogs {
        EpochLogs {
            epoch,
            loss: epoch as f32,
            mae: 1.,
            val_loss,
            val_mae: val_loss,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn series_follow_the_epochs() {
        let mut history = History::new();
        history.push(logs(1, Some(3.)));
        history.push(logs(2, Some(2.)));

        assert_eq!(history.loss(), [1., 2.]);
        assert_eq!(history.val_loss(), Some(vec![3., 2.]));
    }

    #[test]
    fn missing_validation_yields_none() {
        let mut history = History::new();
        history.push(logs(1, None));

        assert_eq!(history.val_loss(), None);
        assert_eq!(history.val_mae(), None);
    }
}
