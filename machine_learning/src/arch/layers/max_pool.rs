use ndarray::prelude::*;

use super::layer::into_rank;
use crate::{MlErr, Result};

/// Non-overlapping max pooling over `[batch, channels, depth, height, width]` inputs. Trailing
/// rows that don't fill a window are dropped.
#[derive(Clone, Debug)]
pub struct MaxPool {
    window: [usize; 3],

    // Forward metadata
    input_dim: (usize, usize, usize, usize, usize),
    argmax: Array5<usize>,
}

impl MaxPool {
    /// Creates a new `MaxPool` layer.
    ///
    /// # Arguments
    /// * `window` - The depth, height and width of the pooling window, also used as stride.
    pub fn new(window: [usize; 3]) -> Self {
        Self {
            window,
            input_dim: (0, 0, 0, 0, 0),
            argmax: Array5::zeros((0, 0, 0, 0, 0)),
        }
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = into_rank::<Ix5>("max pool", x)?;
        let (n, c, depth, h, w) = x.dim();
        let [pd, ph, pw] = self.window;
        let out_dim = (n, c, depth / pd, h / ph, w / pw);

        if out_dim.2 == 0 || out_dim.3 == 0 || out_dim.4 == 0 {
            return Err(MlErr::InvalidInput(format!(
                "a {:?} pooling window doesn't fit a {:?} input",
                self.window,
                (depth, h, w)
            )));
        }

        let mut y = Array5::zeros(out_dim);
        let mut argmax = Array5::zeros(out_dim);

        for ((i, ch, z, r, col), out) in y.indexed_iter_mut() {
            let (a0, b0, e0) = (z * pd, r * ph, col * pw);
            let mut best = x[[i, ch, a0, b0, e0]];
            let mut best_at = (a0 * h + b0) * w + e0;

            for a in z * pd..(z + 1) * pd {
                for b in r * ph..(r + 1) * ph {
                    for e in col * pw..(col + 1) * pw {
                        let v = x[[i, ch, a, b, e]];
                        if v > best {
                            best = v;
                            best_at = (a * h + b) * w + e;
                        }
                    }
                }
            }

            *out = best;
            argmax[[i, ch, z, r, col]] = best_at;
        }

        self.input_dim = x.dim();
        self.argmax = argmax;
        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let d = into_rank::<Ix5>("max pool", d)?;

        if d.dim() != self.argmax.dim() {
            return Err(MlErr::SizeMismatch {
                what: "max pool deltas",
                got: d.len(),
                expected: self.argmax.len(),
            });
        }

        let (_, _, _, h, w) = self.input_dim;
        let mut dx = Array5::zeros(self.input_dim);

        for ((i, ch, z, r, col), &delta) in d.indexed_iter() {
            let at = self.argmax[[i, ch, z, r, col]];
            let (a, rest) = (at / (h * w), at % (h * w));
            dx[[i, ch, a, rest / w, rest % w]] += delta;
        }

        Ok(dx.into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_without_a_max_route_to_their_own_first_cell() {
        let mut pool = MaxPool::new([1, 2, 2]);
        let x = Array::from_elem((1, 1, 1, 4, 4), f32::NEG_INFINITY).into_dyn();

        let y = pool.forward(x).unwrap();
        assert!(y.iter().all(|&v| v == f32::NEG_INFINITY));

        let dx = pool.backward(Array::ones(y.raw_dim())).unwrap();
        for (r, c) in [(0, 0), (0, 2), (2, 0), (2, 2)] {
            assert_eq!(dx[[0, 0, 0, r, c]], 1.);
        }
        assert_eq!(dx.sum(), 4.);
    }

    #[test]
    fn pools_and_routes_gradients_to_the_max() {
        let mut pool = MaxPool::new([1, 2, 2]);
        let x = array![[1., 5., 2., 0.], [3., 4., 8., 1.], [0., 0., 0., 0.], [9., 0., 0., 7.]]
            .into_shape_with_order((1, 1, 1, 4, 4))
            .unwrap()
            .into_dyn();

        let y = pool.forward(x).unwrap();
        assert_eq!(
            y,
            array![[5., 8.], [9., 7.]]
                .into_shape_with_order((1, 1, 1, 2, 2))
                .unwrap()
                .into_dyn()
        );

        let dx = pool.backward(Array::ones(y.raw_dim())).unwrap();
        assert_eq!(dx.sum(), 4.);
        assert_eq!(dx[[0, 0, 0, 0, 1]], 1.);
        assert_eq!(dx[[0, 0, 0, 1, 2]], 1.);
        assert_eq!(dx[[0, 0, 0, 3, 0]], 1.);
        assert_eq!(dx[[0, 0, 0, 3, 3]], 1.);
    }

    #[test]
    fn odd_sizes_are_floored() {
        let mut pool = MaxPool::new([2, 2, 2]);
        let x = Array5::<f32>::zeros((1, 3, 5, 5, 3)).into_dyn();

        let y = pool.forward(x).unwrap();
        assert_eq!(y.shape(), &[1, 3, 2, 2, 1]);
    }

    #[test]
    fn window_larger_than_input_fails() {
        let mut pool = MaxPool::new([2, 2, 2]);
        let x = Array5::<f32>::zeros((1, 1, 1, 4, 4)).into_dyn();
        assert!(pool.forward(x).is_err());
    }
}
