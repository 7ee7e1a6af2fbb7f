use ndarray::prelude::*;

use super::layer::into_rank;
use crate::{MlErr, Result};

/// Averages every channel of a `[batch, channels, depth, height, width]` input over its spatial
/// dimensions, producing `[batch, channels]`.
#[derive(Clone, Debug, Default)]
pub struct GlobalAvgPool {
    input_dim: (usize, usize, usize, usize, usize),
}

impl GlobalAvgPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = into_rank::<Ix5>("global average pool", x)?;
        let (n, c, depth, h, w) = x.dim();
        self.input_dim = x.dim();

        let flat = x.into_shape_with_order((n, c, depth * h * w))?;
        let y = flat
            .mean_axis(Axis(2))
            .ok_or_else(|| MlErr::InvalidInput("empty spatial dimensions".into()))?;

        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let d = into_rank::<Ix2>("global average pool", d)?;
        let (n, c, depth, h, w) = self.input_dim;

        if d.dim() != (n, c) {
            return Err(MlErr::SizeMismatch {
                what: "global average pool deltas",
                got: d.len(),
                expected: n * c,
            });
        }

        let spatial = (depth * h * w) as f32;
        let scaled = (d / spatial).into_shape_with_order((n, c, 1, 1, 1))?;
        let dx = scaled.broadcast(self.input_dim).map(|b| b.to_owned());

        dx.map(|dx| dx.into_dyn())
            .ok_or_else(|| MlErr::InvalidInput("couldn't broadcast pooled deltas".into()))
    }
}
