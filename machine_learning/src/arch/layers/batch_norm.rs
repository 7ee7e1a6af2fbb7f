use ndarray::prelude::*;

use super::Mode;
use crate::{
    MlErr, Result,
    initialization::{ConstParamGen, ParamGen},
};

/// Per-channel batch normalization over `[batch, channels, ...]` inputs.
///
/// Its trainable parameters are the `channels` scales followed by the `channels` offsets. The
/// running mean and variance used at inference are kept as buffers, outside the parameters.
#[derive(Clone, Debug)]
pub struct BatchNorm {
    channels: usize,
    momentum: f32,
    epsilon: f32,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,

    // Forward metadata
    x_hat: Array3<f32>,
    inv_std: Array1<f32>,
    mode: Mode,
}

impl BatchNorm {
    /// Creates a new `BatchNorm` layer.
    ///
    /// # Arguments
    /// * `channels` - The size of the channel axis (axis 1).
    /// * `momentum` - The weight of the previous running statistics on every update.
    /// * `epsilon` - Added to the variance before taking its square root.
    pub fn new(channels: usize, momentum: f32, epsilon: f32) -> Self {
        Self {
            channels,
            momentum,
            epsilon,
            running_mean: Array1::zeros(channels),
            running_var: Array1::ones(channels),
            x_hat: Array3::zeros((0, 0, 0)),
            inv_std: Array1::zeros(0),
            mode: Mode::Infer,
        }
    }

    pub fn size(&self) -> usize {
        2 * self.channels
    }

    pub fn buffer_size(&self) -> usize {
        2 * self.channels
    }

    /// Returns the running mean followed by the running variance.
    pub fn buffers(&self) -> Vec<f32> {
        self.running_mean
            .iter()
            .chain(self.running_var.iter())
            .copied()
            .collect()
    }

    pub fn load_buffers(&mut self, buffers: &[f32]) -> Result<()> {
        if buffers.len() != self.buffer_size() {
            return Err(MlErr::SizeMismatch {
                what: "batch norm buffers",
                got: buffers.len(),
                expected: self.buffer_size(),
            });
        }

        let (mean, var) = buffers.split_at(self.channels);
        self.running_mean = Array1::from(mean.to_vec());
        self.running_var = Array1::from(var.to_vec());
        Ok(())
    }

    /// Unit scales and zero offsets.
    pub fn param_gens(&self) -> Vec<Box<dyn ParamGen>> {
        vec![
            Box::new(ConstParamGen::ones(self.channels)),
            Box::new(ConstParamGen::zeros(self.channels)),
        ]
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayD<f32>, mode: Mode) -> Result<ArrayD<f32>> {
        let shape = x.raw_dim();
        let x = self.to_ncs(x)?;
        let (gamma, beta) = params.split_at(self.channels);
        let (n, _, s) = x.dim();

        let (mean, var) = match mode {
            Mode::Train => {
                let mut mean = Array1::zeros(self.channels);
                let mut var = Array1::zeros(self.channels);

                for (ch, xc) in x.axis_iter(Axis(1)).enumerate() {
                    let m = xc.mean().unwrap_or_default();
                    mean[ch] = m;
                    var[ch] = xc.mapv(|v| (v - m).powi(2)).mean().unwrap_or_default();
                }

                let momentum = self.momentum;
                self.running_mean
                    .zip_mut_with(&mean, |r, &m| *r = momentum * *r + (1. - momentum) * m);
                self.running_var
                    .zip_mut_with(&var, |r, &v| *r = momentum * *r + (1. - momentum) * v);

                (mean, var)
            }
            Mode::Infer => (self.running_mean.clone(), self.running_var.clone()),
        };

        let eps = self.epsilon;
        let inv_std = var.mapv(|v| 1. / (v + eps).sqrt());
        let mut x_hat = x;
        let mut y = Array3::zeros((n, self.channels, s));

        for ch in 0..self.channels {
            let (m, is) = (mean[ch], inv_std[ch]);
            let (g, b) = (gamma[ch], beta[ch]);

            let mut xc = x_hat.index_axis_mut(Axis(1), ch);
            xc.mapv_inplace(|v| (v - m) * is);
            y.index_axis_mut(Axis(1), ch)
                .zip_mut_with(&xc, |y, &xh| *y = g * xh + b);
        }

        self.x_hat = x_hat;
        self.inv_std = inv_std;
        self.mode = mode;

        Ok(y.into_shape_with_order(shape)?)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: ArrayD<f32>,
    ) -> Result<ArrayD<f32>> {
        let shape = d.raw_dim();
        let mut dx = self.to_ncs(d)?;

        if dx.dim() != self.x_hat.dim() {
            return Err(MlErr::SizeMismatch {
                what: "batch norm deltas",
                got: dx.len(),
                expected: self.x_hat.len(),
            });
        }

        let (n, _, s) = dx.dim();
        let m = (n * s) as f32;
        let (gamma, _) = params.split_at(self.channels);
        let (dgamma, dbeta) = grad.split_at_mut(self.channels);

        for ch in 0..self.channels {
            let x_hat = self.x_hat.index_axis(Axis(1), ch);
            let mut dc = dx.index_axis_mut(Axis(1), ch);

            let db = dc.sum();
            let dg = (&dc * &x_hat).sum();
            dgamma[ch] = dg;
            dbeta[ch] = db;

            let scale = gamma[ch] * self.inv_std[ch];
            match self.mode {
                Mode::Train => {
                    dc.zip_mut_with(&x_hat, |d, &xh| *d = scale / m * (m * *d - db - xh * dg))
                }
                Mode::Infer => dc.mapv_inplace(|d| d * scale),
            }
        }

        Ok(dx.into_shape_with_order(shape)?)
    }

    /// Views a rank 2 or rank 5 input as `[batch, channels, spatial]`.
    fn to_ncs(&self, x: ArrayD<f32>) -> Result<Array3<f32>> {
        if x.ndim() != 2 && x.ndim() != 5 {
            return Err(MlErr::RankMismatch {
                layer: "batch norm",
                got: x.ndim(),
                expected: 5,
            });
        }

        let (n, c) = (x.shape()[0], x.shape()[1]);
        if c != self.channels {
            return Err(MlErr::SizeMismatch {
                what: "batch norm channels",
                got: c,
                expected: self.channels,
            });
        }

        let s = x.shape()[2..].iter().product();
        Ok(x.into_shape_with_order((n, c, s))?)
    }
}
