use std::{cell::RefCell, rc::Rc};

use ndarray::{linalg, prelude::*};
use rand::Rng;

use super::layer::into_rank;
use crate::{
    MlErr, Result,
    arch::activations::ActFn,
    initialization::{ConstParamGen, ParamGen, RandParamGen},
};

/// A fully connected layer over `[batch, features]` inputs.
///
/// Its parameters are laid out as the `(in, out)` weight matrix followed by the `out` biases.
#[derive(Clone, Debug)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Array2<f32>,
    z: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The amount of input and output features.
    /// * `act_fn` - An optional activation applied to the output.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        let zeros = Array2::zeros((0, 0));

        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
            x: zeros.clone(),
            z: zeros,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Glorot uniform weights and zero biases.
    pub fn param_gens<R: Rng + 'static>(
        &self,
        rng: &Rc<RefCell<R>>,
    ) -> Result<Vec<Box<dyn ParamGen>>> {
        let (fan_in, fan_out) = self.dim;
        let weights = RandParamGen::xavier_uniform(rng.clone(), fan_in * fan_out, fan_in, fan_out)?;
        let biases = ConstParamGen::zeros(fan_out);
        Ok(vec![Box::new(weights), Box::new(biases)])
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = into_rank::<Ix2>("dense", x)?;

        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense input features",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(params)?;
        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        self.x = x;
        self.z = z;

        let Some(ref act_fn) = self.act_fn else {
            return Ok(self.z.clone().into_dyn());
        };

        Ok(self.z.mapv(|z| act_fn.f(z)).into_dyn())
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: ArrayD<f32>,
    ) -> Result<ArrayD<f32>> {
        let mut d = into_rank::<Ix2>("dense", d)?;

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &self.x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        let mut dx = Array2::zeros((d.nrows(), self.dim.0));
        linalg::general_mat_mul(1.0, &d, &w.t(), 0.0, &mut dx);

        Ok(dx.into_dyn())
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    ///
    /// # Arguments
    /// * `grad` - A gradient slice.
    ///
    /// # Returns
    /// A tuple containing the delta weights and delta biases.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    ///
    /// # Arguments
    /// * `params` - A slice of parameters.
    ///
    /// # Returns
    /// A tuple containing the weights and biases.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let w_size = self.size - self.dim.1;
        let (w_raw, b_raw) = params.split_at(w_size);
        let weights = ArrayView2::from_shape(self.dim, w_raw)?;
        let biases = ArrayView1::from_shape(self.dim.1, b_raw)?;
        Ok((weights, biases))
    }
}
