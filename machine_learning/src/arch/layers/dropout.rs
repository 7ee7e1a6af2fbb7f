use ndarray::prelude::*;
use ndarray_rand::{RandomExt, rand_distr::Uniform};
use rand::{SeedableRng, rngs::StdRng};

use super::Mode;
use crate::{MlErr, Result};

/// Inverted dropout: while training, zeroes every activation with probability `rate` and scales
/// the survivors by `1 / (1 - rate)`. It's the identity at inference.
#[derive(Clone, Debug)]
pub struct Dropout {
    rate: f32,
    rng: StdRng,

    // Forward metadata
    mask: Option<ArrayD<f32>>,
}

impl Dropout {
    /// Creates a new `Dropout` layer.
    ///
    /// # Arguments
    /// * `rate` - The probability of dropping an activation, in `[0, 1)`.
    /// * `seed` - The seed of this layer's own random number generator.
    pub fn new(rate: f32, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(MlErr::InvalidInput(format!(
                "dropout rate should be in [0, 1), got {rate}"
            )));
        }

        Ok(Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
            mask: None,
        })
    }

    pub fn forward(&mut self, x: ArrayD<f32>, mode: Mode) -> Result<ArrayD<f32>> {
        if mode == Mode::Infer || self.rate == 0. {
            self.mask = None;
            return Ok(x);
        }

        let keep = 1. - self.rate;
        let uniform = Uniform::new(0f32, 1.)?;
        let mask = Array::random_using(x.raw_dim(), uniform, &mut self.rng)
            .mapv(|u| if u < keep { 1. / keep } else { 0. });

        let y = x * &mask;
        self.mask = Some(mask);
        Ok(y)
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let Some(ref mask) = self.mask else {
            return Ok(d);
        };

        if d.shape() != mask.shape() {
            return Err(MlErr::SizeMismatch {
                what: "dropout deltas",
                got: d.len(),
                expected: mask.len(),
            });
        }

        Ok(d * mask)
    }
}
