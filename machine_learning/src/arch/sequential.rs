use std::{cell::RefCell, rc::Rc};

use ndarray::{Array2, ArrayD, Ix2};
use rand::Rng;

use super::{
    LossReport, Model,
    layers::{Layer, Mode},
    loss::{LossFn, mean_absolute_error},
};
use crate::{
    MlErr, Result,
    initialization::{ChainedParamGen, ParamGen},
    optimization::Optimizer,
    training::{FrontIter, ParamManager},
};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Clone, Debug)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Returns the amount of non trainable values kept by the layers.
    pub fn buffer_size(&self) -> usize {
        self.layers.iter().map(|layer| layer.buffer_size()).sum()
    }

    /// Returns the non trainable values of every layer, concatenated in layer order.
    pub fn buffers(&self) -> Vec<f32> {
        self.layers.iter().flat_map(|layer| layer.buffers()).collect()
    }

    /// Restores the non trainable values of every layer.
    ///
    /// # Arguments
    /// * `buffers` - The values as returned by `buffers`.
    pub fn load_buffers(&mut self, buffers: &[f32]) -> Result<()> {
        if buffers.len() != self.buffer_size() {
            return Err(MlErr::SizeMismatch {
                what: "model buffers",
                got: buffers.len(),
                expected: self.buffer_size(),
            });
        }

        let mut rest = buffers;
        for layer in &mut self.layers {
            let (head, tail) = rest.split_at(layer.buffer_size());
            layer.load_buffers(head)?;
            rest = tail;
        }

        Ok(())
    }

    /// Samples the initial parameters of every layer.
    ///
    /// # Arguments
    /// * `rng` - The random number generator used by every random initialization.
    pub fn init_params<R: Rng + 'static>(&self, rng: &Rc<RefCell<R>>) -> Result<Vec<f32>> {
        let size = self.size();
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut param_gens = Vec::new();
        for layer in &self.layers {
            param_gens.extend(layer.param_gens(rng)?);
        }

        let params = ChainedParamGen::new(param_gens)
            .sample(size)
            .unwrap_or_default();

        if params.len() != size {
            return Err(MlErr::SizeMismatch {
                what: "initial parameters",
                got: params.len(),
                expected: size,
            });
        }

        Ok(params)
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `x` - The input data.
    /// * `mode` - Whether the pass is part of training.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    pub fn forward(&mut self, params: &[f32], mut x: ArrayD<f32>, mode: Mode) -> Result<ArrayD<f32>> {
        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        let mut front = FrontIter::new(params);
        let nlayers = self.layers.len();

        for (i, layer) in self.layers.iter_mut().enumerate() {
            let params = front.take(layer.size()).ok_or(MlErr::SizeMismatch {
                what: "layers",
                got: i,
                expected: nlayers,
            })?;

            x = layer.forward(params, x, mode)?;
        }

        Ok(x)
    }

    /// Computes the loss and mean absolute error over the given batches without training.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `loss_fn` - The loss function.
    /// * `batches` - The batches of data.
    pub fn evaluate<L, I>(&mut self, params: &[f32], loss_fn: &L, batches: I) -> Result<LossReport>
    where
        L: LossFn,
        I: Iterator<Item = (ArrayD<f32>, Array2<f32>)>,
    {
        let mut totals = Totals::default();

        for (x, y) in batches {
            let y_pred = self.predict_batch(params, x, Mode::Infer, &y)?;
            totals.add(loss_fn, &y_pred, &y);
        }

        totals.report()
    }

    fn predict_batch(
        &mut self,
        params: &[f32],
        x: ArrayD<f32>,
        mode: Mode,
        y: &Array2<f32>,
    ) -> Result<Array2<f32>> {
        let y_pred = self
            .forward(params, x, mode)?
            .into_dimensionality::<Ix2>()?;

        if y_pred.dim() != y.dim() {
            return Err(MlErr::SizeMismatch {
                what: "predictions",
                got: y_pred.len(),
                expected: y.len(),
            });
        }

        Ok(y_pred)
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.layers.iter().map(|layer| layer.size()).sum()
    }

    fn backprop<L, O, I>(
        &mut self,
        params: &mut ParamManager<'_>,
        loss_fn: &L,
        optimizer: &mut O,
        batches: I,
    ) -> Result<LossReport>
    where
        L: LossFn,
        O: Optimizer,
        I: Iterator<Item = (ArrayD<f32>, Array2<f32>)>,
    {
        let nlayers = self.layers.len();
        let mut totals = Totals::default();

        for (x, y) in batches {
            params.zero_grad();

            // The loss is measured before the step, like the running average of an epoch.
            let y_pred = self.predict_batch(params.params(), x, Mode::Train, &y)?;
            totals.add(loss_fn, &y_pred, &y);

            let mut back = params.back();
            let mut d = loss_fn.loss_prime(y_pred.view(), y.view()).into_dyn();

            for (i, layer) in self.layers.iter_mut().rev().enumerate() {
                let (layer_params, grad) =
                    back.take(layer.size()).ok_or(MlErr::SizeMismatch {
                        what: "layers",
                        got: i,
                        expected: nlayers,
                    })?;

                d = layer.backward(layer_params, grad, d)?;
            }

            let (weights, grad) = params.split();
            optimizer.update_params(weights, grad)?;
        }

        totals.report()
    }
}

/// Sample-weighted sums of the loss and mean absolute error over several batches.
#[derive(Default)]
struct Totals {
    loss: f32,
    mae: f32,
    samples: usize,
}

impl Totals {
    fn add<L: LossFn>(&mut self, loss_fn: &L, y_pred: &Array2<f32>, y: &Array2<f32>) {
        let n = y.nrows();
        self.loss += loss_fn.loss(y_pred.view(), y.view()) * n as f32;
        self.mae += mean_absolute_error(y_pred.view(), y.view()) * n as f32;
        self.samples += n;
    }

    fn report(&self) -> Result<LossReport> {
        if self.samples == 0 {
            return Err(MlErr::InvalidInput("there were no batches to go through".into()));
        }

        let n = self.samples as f32;
        Ok(LossReport {
            loss: self.loss / n,
            mae: self.mae / n,
        })
    }
}
