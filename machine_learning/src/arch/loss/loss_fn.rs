use ndarray::{Array2, ArrayView2};

pub trait LossFn {
    /// Computes the loss between a prediction and its expected output.
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32;

    /// Computes the derivative of the loss with respect to the prediction.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;
}
