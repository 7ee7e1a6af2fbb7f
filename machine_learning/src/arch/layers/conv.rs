use std::{cell::RefCell, rc::Rc};

use ndarray::{linalg, prelude::*};
use rand::Rng;
use rayon::prelude::*;

use super::layer::into_rank;
use crate::{
    MlErr, Result,
    arch::activations::ActFn,
    initialization::{ConstParamGen, ParamGen, RandParamGen},
};

/// A stride 1, "same" zero-padded convolution over `[batch, channels, depth, height, width]`
/// inputs. Planar data uses a depth of 1 and a kernel depth of 1.
///
/// Its parameters are laid out as the `(out, in * kd * kh * kw)` kernel matrix followed by the
/// `out` biases.
#[derive(Clone, Debug)]
pub struct Conv {
    in_channels: usize,
    out_channels: usize,
    kernel: [usize; 3],
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    cols: Vec<Array2<f32>>,
    z: Array5<f32>,
}

impl Conv {
    /// Creates a new `Conv` layer.
    ///
    /// # Arguments
    /// * `in_channels` - The amount of channels of the input.
    /// * `out_channels` - The amount of filters.
    /// * `kernel` - The depth, height and width of every filter. Should be odd.
    /// * `act_fn` - An optional activation applied to the output.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: [usize; 3],
        act_fn: Option<ActFn>,
    ) -> Self {
        let patch = in_channels * kernel.iter().product::<usize>();

        Self {
            in_channels,
            out_channels,
            kernel,
            act_fn,
            size: (patch + 1) * out_channels,
            cols: Vec::new(),
            z: Array5::zeros((0, 0, 0, 0, 0)),
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    fn patch_len(&self) -> usize {
        self.in_channels * self.kernel.iter().product::<usize>()
    }

    /// Glorot uniform kernels and zero biases.
    pub fn param_gens<R: Rng + 'static>(
        &self,
        rng: &Rc<RefCell<R>>,
    ) -> Result<Vec<Box<dyn ParamGen>>> {
        let receptive_field: usize = self.kernel.iter().product();
        let fan_in = self.in_channels * receptive_field;
        let fan_out = self.out_channels * receptive_field;
        let limit = self.size - self.out_channels;

        let weights = RandParamGen::xavier_uniform(rng.clone(), limit, fan_in, fan_out)?;
        let biases = ConstParamGen::zeros(self.out_channels);
        Ok(vec![Box::new(weights), Box::new(biases)])
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = into_rank::<Ix5>("conv", x)?;
        let (n, c, depth, h, w) = x.dim();

        if c != self.in_channels {
            return Err(MlErr::SizeMismatch {
                what: "conv input channels",
                got: c,
                expected: self.in_channels,
            });
        }

        let (weights, biases) = self.view_params(params)?;
        let (out_channels, kernel) = (self.out_channels, self.kernel);
        let spatial = depth * h * w;

        let samples: Vec<_> = (0..n)
            .into_par_iter()
            .map(|i| {
                let cols = im2col(x.index_axis(Axis(0), i), kernel);
                let mut z = Array2::zeros((out_channels, spatial));
                linalg::general_mat_mul(1.0, &weights, &cols, 0.0, &mut z);
                z += &biases.insert_axis(Axis(1));
                (cols, z)
            })
            .collect();

        let mut z = Array5::zeros((n, out_channels, depth, h, w));
        self.cols = Vec::with_capacity(n);

        for (i, (cols, zi)) in samples.into_iter().enumerate() {
            let zi = zi.into_shape_with_order((out_channels, depth, h, w))?;
            z.index_axis_mut(Axis(0), i).assign(&zi);
            self.cols.push(cols);
        }

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
        let mut d = into_rank::<Ix5>("conv", d)?;

        if d.dim() != self.z.dim() {
            return Err(MlErr::SizeMismatch {
                what: "conv deltas",
                got: d.len(),
                expected: self.z.len(),
            });
        }

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let (n, out_channels, depth, h, w) = d.dim();
        let spatial = depth * h * w;

        let (weights, _) = self.view_params(params)?;
        let (mut dw, mut db) = self.view_grad(grad)?;
        dw.fill(0.);
        db.fill(0.);

        let mut dx = Array5::zeros((n, self.in_channels, depth, h, w));

        for (i, cols) in self.cols.iter().enumerate() {
            let di = d.index_axis(Axis(0), i);
            let di = di.to_shape((out_channels, spatial))?;

            linalg::general_mat_mul(1.0, &di, &cols.t(), 1.0, &mut dw);
            db += &di.sum_axis(Axis(1));

            let mut dcols = Array2::zeros((cols.nrows(), spatial));
            linalg::general_mat_mul(1.0, &weights.t(), &di, 0.0, &mut dcols);
            col2im(dcols.view(), dx.index_axis_mut(Axis(0), i), self.kernel);
        }

        Ok(dx.into_dyn())
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let shape = (self.out_channels, self.patch_len());
        let (dw_raw, db_raw) = grad.split_at_mut(self.size - self.out_channels);
        let dw = ArrayViewMut2::from_shape(shape, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.out_channels, db_raw)?;
        Ok((dw, db))
    }

    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let shape = (self.out_channels, self.patch_len());
        let (w_raw, b_raw) = params.split_at(self.size - self.out_channels);
        let weights = ArrayView2::from_shape(shape, w_raw)?;
        let biases = ArrayView1::from_shape(self.out_channels, b_raw)?;
        Ok((weights, biases))
    }
}

/// Yields `(channel, kd, kh, kw)` offsets in the row order of the unfolded patch matrix.
fn patch_rows(
    channels: usize,
    [kd, kh, kw]: [usize; 3],
) -> impl Iterator<Item = (usize, usize, usize, usize)> {
    (0..channels).flat_map(move |c| {
        (0..kd).flat_map(move |a| (0..kh).flat_map(move |b| (0..kw).map(move |e| (c, a, b, e))))
    })
}

/// Maps an output coordinate plus a kernel offset to its input coordinate, `None` inside the
/// zero padding.
fn shift(pos: usize, offset: usize, k: usize, len: usize) -> Option<usize> {
    (pos + offset).checked_sub(k / 2).filter(|&p| p < len)
}

/// Unfolds every kernel window of a `[channels, depth, height, width]` sample into the columns
/// of a `[channels * kernel volume, depth * height * width]` matrix.
fn im2col(x: ArrayView4<f32>, kernel: [usize; 3]) -> Array2<f32> {
    let (c, depth, h, w) = x.dim();
    let [kd, kh, kw] = kernel;
    let mut cols = Array2::zeros((c * kd * kh * kw, depth * h * w));

    for (row, (ci, a, b, e)) in patch_rows(c, kernel).enumerate() {
        let mut out = cols.row_mut(row);

        for z in 0..depth {
            let Some(sz) = shift(z, a, kd, depth) else {
                continue;
            };

            for y in 0..h {
                let Some(sy) = shift(y, b, kh, h) else {
                    continue;
                };

                for xi in 0..w {
                    if let Some(sx) = shift(xi, e, kw, w) {
                        out[(z * h + y) * w + xi] = x[[ci, sz, sy, sx]];
                    }
                }
            }
        }
    }

    cols
}

/// Folds a patch matrix back onto a `[channels, depth, height, width]` sample, accumulating
/// overlapping windows.
fn col2im(cols: ArrayView2<f32>, mut dx: ArrayViewMut4<f32>, kernel: [usize; 3]) {
    let (c, depth, h, w) = dx.dim();
    let [kd, kh, kw] = kernel;

    for (row, (ci, a, b, e)) in patch_rows(c, kernel).enumerate() {
        let col = cols.row(row);

        for z in 0..depth {
            let Some(sz) = shift(z, a, kd, depth) else {
                continue;
            };

            for y in 0..h {
                let Some(sy) = shift(y, b, kh, h) else {
                    continue;
                };

                for xi in 0..w {
                    if let Some(sx) = shift(xi, e, kw, w) {
                        dx[[ci, sz, sy, sx]] += col[(z * h + y) * w + xi];
                    }
                }
            }
        }
    }
}
