use std::{cell::RefCell, rc::Rc};

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{
    Sequential,
    activations::ActFn,
    layers::Layer,
    spec::{ActFnSpec, LayerSpec, ModelSpec},
};
use crate::Result;

/// Builds models given a specification.
pub struct ModelBuilder {
    rng: Rc<RefCell<StdRng>>,
}

impl ModelBuilder {
    /// Creates a new `ModelBuilder`.
    ///
    /// # Arguments
    /// * `seed` - Seeds the initial parameters and the dropout masks, entropy from the OS if
    ///   `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            rng: Rc::new(RefCell::new(rng)),
        }
    }

    /// Builds a new model following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification for the model.
    pub fn build(&self, spec: &ModelSpec) -> Result<Sequential> {
        match spec {
            ModelSpec::Sequential {
                layers: layer_specs,
            } => {
                let layers = layer_specs
                    .iter()
                    .map(|ls| self.resolve_layer(*ls))
                    .collect::<Result<Vec<_>>>()?;

                Ok(Sequential::new(layers))
            }
        }
    }

    /// Samples the initial parameters of a model.
    pub fn init_params(&self, model: &Sequential) -> Result<Vec<f32>> {
        model.init_params(&self.rng)
    }

    fn resolve_layer(&self, spec: LayerSpec) -> Result<Layer> {
        let layer = match spec {
            LayerSpec::Conv {
                in_channels,
                out_channels,
                kernel,
                act_fn,
            } => Layer::conv(in_channels, out_channels, kernel, self.resolve_act_fn(act_fn)),
            LayerSpec::MaxPool { window } => Layer::max_pool(window),
            LayerSpec::BatchNorm {
                channels,
                momentum,
                epsilon,
            } => Layer::batch_norm(channels, momentum, epsilon),
            LayerSpec::Dropout { rate } => {
                let seed = self.rng.borrow_mut().random();
                Layer::dropout(rate, seed)?
            }
            LayerSpec::GlobalAvgPool => Layer::global_avg_pool(),
            LayerSpec::Dense { dim, act_fn } => Layer::dense(dim, self.resolve_act_fn(act_fn)),
        };

        Ok(layer)
    }

    fn resolve_act_fn(&self, spec: Option<ActFnSpec>) -> Option<ActFn> {
        spec.map(|act_fn| match act_fn {
            ActFnSpec::Relu => ActFn::relu(),
        })
    }
}
