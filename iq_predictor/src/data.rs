use std::path::PathBuf;

use machine_learning::{
    MlErr,
    dataset::{Dataset, split_indices},
};
use ndarray::{ArrayD, Axis, stack};
use rand::{SeedableRng, rngs::StdRng};

use crate::error::{IqErr, Result};

/// Preprocessed scans paired with their IQ scores.
#[derive(Debug, Clone, Default)]
pub struct LabeledData {
    pub samples: Vec<ArrayD<f32>>,
    pub labels: Vec<f32>,
    pub paths: Vec<PathBuf>,
}

impl LabeledData {
    pub fn push(&mut self, path: PathBuf, sample: ArrayD<f32>, label: f32) {
        self.paths.push(path);
        self.samples.push(sample);
        self.labels.push(label);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns the samples at `indices`, in that order.
    pub fn subset(&self, indices: &[usize]) -> Self {
        let mut subset = Self::default();
        for &i in indices {
            subset.push(
                self.paths[i].clone(),
                self.samples[i].clone(),
                self.labels[i],
            );
        }

        subset
    }

    /// Stacks the samples into a `Dataset`.
    pub fn to_dataset(&self) -> Result<Dataset> {
        if self.is_empty() {
            return Err(IqErr::NoData("there are no samples to stack".into()));
        }

        let samples = self
            .samples
            .iter()
            .map(|s| s.view())
            .zip(self.labels.iter().copied());

        Ok(Dataset::from_samples(samples)?)
    }

    /// Stacks the samples along a new leading batch axis.
    pub fn stacked(&self) -> Result<ArrayD<f32>> {
        stack_samples(&self.samples)
    }

    /// Randomly holds out a fraction of the samples.
    ///
    /// # Arguments
    /// * `fraction` - The held out fraction, rounded up.
    /// * `seed` - Seeds the shuffle so splits are reproducible.
    ///
    /// # Returns
    /// The kept and the held out samples.
    pub fn split(&self, fraction: f32, seed: u64) -> Result<(Self, Self)> {
        let mut rng = StdRng::seed_from_u64(seed);
        let (keep, held_out) = split_indices(self.len(), fraction, &mut rng)?;
        Ok((self.subset(&keep), self.subset(&held_out)))
    }
}

/// Stacks channel-last samples of the same shape into a batch.
pub fn stack_samples(samples: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
    if samples.is_empty() {
        return Err(IqErr::NoData("there are no samples to stack".into()));
    }

    let views: Vec<_> = samples.iter().map(|s| s.view()).collect();
    Ok(stack(Axis(0), &views).map_err(MlErr::from)?)
}

#[cfg(test)]
mod tests {
    use ndarray::Array3;

    use super::*;

    fn data(n: usize) -> LabeledData {
        let mut data = LabeledData::default();
        for i in 0..n {
            data.push(
                PathBuf::from(format!("scan_{i}.png")),
                Array3::from_elem((4, 4, 1), i as f32).into_dyn(),
                100. + i as f32,
            );
        }

        data
    }

    #[test]
    fn split_is_reproducible_and_keeps_pairs() {
        let data = data(10);

        let (train, test) = data.split(0.2, 42).unwrap();
        let (train_again, _) = data.split(0.2, 42).unwrap();

        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);
        assert_eq!(train.paths, train_again.paths);

        for (sample, label) in test.samples.iter().zip(&test.labels) {
            assert_eq!(sample[[0, 0, 0]] + 100., *label);
        }
    }

    #[test]
    fn dataset_holds_every_sample() {
        let dataset = data(3).to_dataset().unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(data(3).stacked().unwrap().shape(), &[3, 4, 4, 1]);
        assert!(LabeledData::default().to_dataset().is_err());
    }
}
