use super::Optimizer;
use crate::{MlErr, Result};

/// Gradient descent optimization algorithm.
#[derive(Clone, Debug)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Returns a new `GradientDescent`.
    ///
    /// # Arguments
    /// * `learning_rate` - The *length* of the steps taken on `update_params`.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    /// Updates the parameters according to the algorithm's learning rule, that is, making a step in
    /// the opposite direction of the gradient, with a length of `learning_rate`.
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        if params.len() != grad.len() {
            return Err(MlErr::SizeMismatch {
                what: "gradient",
                got: grad.len(),
                expected: params.len(),
            });
        }

        let lr = self.learning_rate;

        for (w, g) in params.iter_mut().zip(grad) {
            *w -= lr * g;
        }

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }
}
