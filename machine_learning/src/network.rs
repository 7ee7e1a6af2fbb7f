use std::num::NonZeroUsize;

use ndarray::{Array1, ArrayD, Axis, Ix2, concatenate};

use crate::{
    MlErr, Result,
    arch::{
        LossReport, Model, ModelBuilder, Sequential, layers::Mode, loss::LossFn, spec::ModelSpec,
    },
    dataset::{Dataset, to_channels_first},
};

const PREDICT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(32).unwrap();

/// A model together with its parameters and the description it was built from.
#[derive(Clone, Debug)]
pub struct Network {
    spec: ModelSpec,
    input_shape: Vec<usize>,
    model: Sequential,
    params: Vec<f32>,
}

impl Network {
    /// Builds a freshly initialized `Network`.
    ///
    /// # Arguments
    /// * `spec` - The architecture.
    /// * `input_shape` - The shape of a single sample, channels last.
    /// * `seed` - Seeds the initialization, entropy from the OS if `None`.
    pub fn new(spec: ModelSpec, input_shape: Vec<usize>, seed: Option<u64>) -> Result<Self> {
        let builder = ModelBuilder::new(seed);
        let model = builder.build(&spec)?;
        let params = builder.init_params(&model)?;

        Ok(Self {
            spec,
            input_shape,
            model,
            params,
        })
    }

    /// Builds a `Network` with known parameters and buffers.
    pub fn from_parts(
        spec: ModelSpec,
        input_shape: Vec<usize>,
        params: Vec<f32>,
        buffers: &[f32],
    ) -> Result<Self> {
        let model = ModelBuilder::new(None).build(&spec)?;
        let mut network = Self {
            spec,
            input_shape,
            model,
            params: Vec::new(),
        };

        network.set_state(params, buffers)?;
        Ok(network)
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn buffers(&self) -> Vec<f32> {
        self.model.buffers()
    }

    /// Returns the amount of trainable parameters.
    pub fn size(&self) -> usize {
        self.model.size()
    }

    /// Replaces the parameters and the layers' buffers.
    pub fn set_state(&mut self, params: Vec<f32>, buffers: &[f32]) -> Result<()> {
        if params.len() != self.model.size() {
            return Err(MlErr::SizeMismatch {
                what: "parameters",
                got: params.len(),
                expected: self.model.size(),
            });
        }

        self.model.load_buffers(buffers)?;
        self.params = params;
        Ok(())
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut Sequential, &mut [f32]) {
        (&mut self.model, &mut self.params)
    }

    /// Predicts one value per sample.
    ///
    /// # Arguments
    /// * `x` - The samples, channels last, with a leading batch axis.
    ///
    /// # Returns
    /// The predictions, or an error if the samples don't have the expected shape.
    pub fn predict(&mut self, x: ArrayD<f32>) -> Result<Array1<f32>> {
        if x.ndim() == 0 || x.shape()[1..] != self.input_shape[..] {
            return Err(MlErr::InvalidInput(format!(
                "expected samples of shape {:?}, got a batch of shape {:?}",
                self.input_shape,
                x.shape()
            )));
        }

        let x = to_channels_first(x)?;
        if x.is_empty() {
            return Ok(Array1::zeros(0));
        }

        let mut outputs = Vec::new();

        for chunk in x.axis_chunks_iter(Axis(0), PREDICT_BATCH_SIZE.get()) {
            let y = self
                .model
                .forward(&self.params, chunk.to_owned().into_dyn(), Mode::Infer)?
                .into_dimensionality::<Ix2>()?;
            outputs.push(y);
        }

        let views: Vec<_> = outputs.iter().map(|y| y.view()).collect();
        let y = concatenate(Axis(0), &views)?;

        Ok(y.column(0).to_owned())
    }

    /// Computes the loss and mean absolute error over a dataset, at inference.
    pub fn evaluate<L: LossFn>(&mut self, data: &Dataset, loss_fn: &L) -> Result<LossReport> {
        self.model
            .evaluate(&self.params, loss_fn, data.batches(PREDICT_BATCH_SIZE))
    }
}
