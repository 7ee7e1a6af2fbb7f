use ndarray::{Array2, ArrayD};

use crate::{
    arch::loss::LossFn, error::Result, optimization::Optimizer, training::ParamManager,
};

/// The loss and mean absolute error of a model over some data.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LossReport {
    pub loss: f32,
    pub mae: f32,
}

pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Computes the gradient of the loss function with respect to the parameters of the model over
    /// the provided batches. **The parameters get updated** for each batch according to the
    /// optimization algorithm.
    ///
    /// # Arguments
    /// * `params` - The manager of the model's parameters and gradient.
    /// * `loss_fn` - The loss function.
    /// * `optimizer` - The optimizer that dictates how to update the weights on each gradient calculation.
    /// * `batches` - The batches of data.
    ///
    /// # Returns
    /// The epoch loss and mean absolute error.
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
        I: Iterator<Item = (ArrayD<f32>, Array2<f32>)>;
}
