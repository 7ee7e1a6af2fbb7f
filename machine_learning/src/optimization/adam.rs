use super::Optimizer;
use crate::{MlErr, Result};

#[derive(Clone, Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
}

impl Adam {
    pub const BETA1: f32 = 0.9;
    pub const BETA2: f32 = 0.999;
    pub const EPSILON: f32 = 1e-7;

    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon,
        }
    }

    /// Creates a new `Adam` optimizer with the usual hyperparameters.
    pub fn with_defaults(len: usize, learning_rate: f32) -> Self {
        Self::new(len, learning_rate, Self::BETA1, Self::BETA2, Self::EPSILON)
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        if grad.len() != params.len() || params.len() != self.v.len() {
            return Err(MlErr::SizeMismatch {
                what: "adam state",
                got: params.len(),
                expected: self.v.len(),
            });
        }

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps);
            });

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_the_learning_rate() {
        let mut adam = Adam::with_defaults(2, 0.1);
        let mut params = [1.0, -1.0];

        adam.update_params(&mut params, &[0.5, -3.0]).unwrap();

        assert!((params[0] - 0.9).abs() < 1e-5);
        assert!((params[1] + 0.9).abs() < 1e-5);
    }

    #[test]
    fn minimizes_a_quadratic() {
        let mut adam = Adam::with_defaults(1, 0.05);
        let mut params = [4.0];

        for _ in 0..1000 {
            let grad = [2. * (params[0] - 1.)];
            adam.update_params(&mut params, &grad).unwrap();
        }

        assert!((params[0] - 1.).abs() < 5e-2);
    }

    #[test]
    fn size_mismatch_fails() {
        let mut adam = Adam::with_defaults(3, 0.1);
        assert!(adam.update_params(&mut [0.; 2], &[0.; 2]).is_err());
    }
}
