use std::{cell::RefCell, rc::Rc};

use ndarray::{Array, ArrayD, Dimension};
use rand::Rng;

use crate::{MlErr, Result, arch::activations::ActFn, initialization::ParamGen};

/// Whether a forward pass is part of training or of inference. Dropout and batch
/// normalization behave differently on each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Train,
    Infer,
}

#[derive(Clone, Debug)]
pub enum Layer {
    Conv(super::Conv),
    MaxPool(super::MaxPool),
    BatchNorm(super::BatchNorm),
    Dropout(super::Dropout),
    GlobalAvgPool(super::GlobalAvgPool),
    Dense(super::Dense),
}
use Layer::*;

impl Layer {
    pub fn conv(
        in_channels: usize,
        out_channels: usize,
        kernel: [usize; 3],
        act_fn: Option<ActFn>,
    ) -> Self {
        Conv(super::Conv::new(in_channels, out_channels, kernel, act_fn))
    }

    pub fn max_pool(window: [usize; 3]) -> Self {
        MaxPool(super::MaxPool::new(window))
    }

    pub fn batch_norm(channels: usize, momentum: f32, epsilon: f32) -> Self {
        BatchNorm(super::BatchNorm::new(channels, momentum, epsilon))
    }

    pub fn dropout(rate: f32, seed: u64) -> Result<Self> {
        Ok(Dropout(super::Dropout::new(rate, seed)?))
    }

    pub fn global_avg_pool() -> Self {
        GlobalAvgPool(super::GlobalAvgPool::new())
    }

    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Dense(super::Dense::new(dim, act_fn))
    }

    /// Returns the amount of trainable parameters of this layer.
    pub fn size(&self) -> usize {
        match self {
            Conv(l) => l.size(),
            BatchNorm(l) => l.size(),
            Dense(l) => l.size(),
            MaxPool(_) | Dropout(_) | GlobalAvgPool(_) => 0,
        }
    }

    /// Returns the amount of non trainable values this layer keeps between passes.
    pub fn buffer_size(&self) -> usize {
        match self {
            BatchNorm(l) => l.buffer_size(),
            _ => 0,
        }
    }

    pub fn buffers(&self) -> Vec<f32> {
        match self {
            BatchNorm(l) => l.buffers(),
            _ => Vec::new(),
        }
    }

    pub fn load_buffers(&mut self, buffers: &[f32]) -> Result<()> {
        match self {
            BatchNorm(l) => l.load_buffers(buffers),
            _ if buffers.is_empty() => Ok(()),
            _ => Err(MlErr::SizeMismatch {
                what: "layer buffers",
                got: buffers.len(),
                expected: 0,
            }),
        }
    }

    /// The generators for this layer's initial parameters, in parameter order.
    ///
    /// # Arguments
    /// * `rng` - The random number generator shared by every layer of the model.
    pub fn param_gens<R: Rng + 'static>(
        &self,
        rng: &Rc<RefCell<R>>,
    ) -> Result<Vec<Box<dyn ParamGen>>> {
        match self {
            Conv(l) => l.param_gens(rng),
            Dense(l) => l.param_gens(rng),
            BatchNorm(l) => Ok(l.param_gens()),
            MaxPool(_) | Dropout(_) | GlobalAvgPool(_) => Ok(Vec::new()),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayD<f32>, mode: Mode) -> Result<ArrayD<f32>> {
        match self {
            Conv(l) => l.forward(params, x),
            MaxPool(l) => l.forward(x),
            BatchNorm(l) => l.forward(params, x, mode),
            Dropout(l) => l.forward(x, mode),
            GlobalAvgPool(l) => l.forward(x),
            Dense(l) => l.forward(params, x),
        }
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: ArrayD<f32>,
    ) -> Result<ArrayD<f32>> {
        match self {
            Conv(l) => l.backward(params, grad, d),
            MaxPool(l) => l.backward(d),
            BatchNorm(l) => l.backward(params, grad, d),
            Dropout(l) => l.backward(d),
            GlobalAvgPool(l) => l.backward(d),
            Dense(l) => l.backward(params, grad, d),
        }
    }
}

/// Converts a dynamic rank input into the fixed rank a layer works with.
pub(super) fn into_rank<D: Dimension>(
    layer: &'static str,
    x: ArrayD<f32>,
) -> Result<Array<f32, D>> {
    let got = x.ndim();

    x.into_dimensionality::<D>()
        .map_err(|_| MlErr::RankMismatch {
            layer,
            got,
            expected: D::NDIM.unwrap_or(got),
        })
}
