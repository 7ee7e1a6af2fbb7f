use std::num::NonZeroUsize;

use ndarray::{Array1, Array2, Array5, ArrayD, ArrayViewD, Axis, Ix5, stack};
use rand::{Rng, seq::SliceRandom};

use crate::{MlErr, Result};

/// A labeled set of samples kept in the layout the layers work with,
/// `[batch, channels, depth, height, width]`.
#[derive(Clone, Debug)]
pub struct Dataset {
    x: Array5<f32>,
    y: Array2<f32>,
    order: Vec<usize>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `x` - The samples, channels last: `[batch, height, width, channels]` or
    ///   `[batch, height, width, depth, channels]`.
    /// * `y` - One target per sample.
    pub fn new(x: ArrayD<f32>, y: Array1<f32>) -> Result<Self> {
        let x = to_channels_first(x)?;
        let n = x.len_of(Axis(0));

        if n != y.len() {
            return Err(MlErr::SizeMismatch {
                what: "targets",
                got: y.len(),
                expected: n,
            });
        }

        Ok(Self {
            x,
            y: y.insert_axis(Axis(1)),
            order: (0..n).collect(),
        })
    }

    /// Stacks individual channels last samples with their targets into a `Dataset`.
    pub fn from_samples<'a, I>(samples: I) -> Result<Self>
    where
        I: IntoIterator<Item = (ArrayViewD<'a, f32>, f32)>,
    {
        let (views, targets): (Vec<_>, Vec<_>) = samples.into_iter().unzip();

        if views.is_empty() {
            return Err(MlErr::InvalidInput("a dataset needs at least one sample".into()));
        }

        let x = stack(Axis(0), &views)?;
        Self::new(x, Array1::from(targets))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn targets(&self) -> &Array2<f32> {
        &self.y
    }

    /// Shuffles the order in which `batches` yields the samples.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        self.order.shuffle(rng);
    }

    /// Yields the samples in batches of at most `batch_size`.
    pub fn batches(
        &self,
        batch_size: NonZeroUsize,
    ) -> impl Iterator<Item = (ArrayD<f32>, Array2<f32>)> + '_ {
        self.order.chunks(batch_size.get()).map(|idx| {
            let x = self.x.select(Axis(0), idx).into_dyn();
            let y = self.y.select(Axis(0), idx);
            (x, y)
        })
    }
}

/// Moves the trailing channel axis of a `[batch, spatial..., channels]` tensor next to the
/// batch axis, giving planar tensors a depth of one.
pub fn to_channels_first(x: ArrayD<f32>) -> Result<Array5<f32>> {
    let x = match x.ndim() {
        4 => x.permuted_axes(vec![0, 3, 1, 2]).insert_axis(Axis(2)),
        5 => x.permuted_axes(vec![0, 4, 1, 2, 3]),
        got => {
            return Err(MlErr::RankMismatch {
                layer: "input",
                got,
                expected: 5,
            });
        }
    };

    Ok(x.as_standard_layout().into_owned().into_dimensionality::<Ix5>()?)
}

/// Shuffles `0..n` and splits it into train and test indices.
///
/// # Arguments
/// * `n` - The amount of samples.
/// * `test_fraction` - The fraction of samples held out, rounded up.
/// * `rng` - The random number generator used for shuffling.
///
/// # Returns
/// The train and test indices, or an error if either side would be empty.
pub fn split_indices<R: Rng>(
    n: usize,
    test_fraction: f32,
    rng: &mut R,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(0.0..1.0).contains(&test_fraction) {
        return Err(MlErr::InvalidInput(format!(
            "the test fraction should be in [0, 1), got {test_fraction}"
        )));
    }

    let n_test = (n as f32 * test_fraction).ceil() as usize;
    if n_test > 0 && n_test >= n {
        return Err(MlErr::InvalidInput(format!(
            "holding out {n_test} of {n} samples leaves nothing to train on"
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    let train = indices.split_off(n_test);

    Ok((train, indices))
}
