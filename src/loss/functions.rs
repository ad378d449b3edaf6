use ndarray::{Array2, ArrayView2};

/// A scalar objective over `[batch, outputs]` predictions.
pub trait Loss: Send + Sync {
    fn compute_batch(&self, predictions: ArrayView2<f32>, targets: ArrayView2<f32>) -> f32;

    /// ∂loss/∂predictions, same shape as `predictions`.
    fn gradient_batch(&self, predictions: ArrayView2<f32>, targets: ArrayView2<f32>) -> Array2<f32>;
}

/// Mean squared error averaged over every element.
pub struct MSE;

impl Loss for MSE {
    fn compute_batch(&self, predictions: ArrayView2<f32>, targets: ArrayView2<f32>) -> f32 {
        let diff = &predictions - &targets;
        (&diff * &diff).mean().unwrap_or(0.0)
    }

    fn gradient_batch(&self, predictions: ArrayView2<f32>, targets: ArrayView2<f32>) -> Array2<f32> {
        let count = predictions.len().max(1) as f32;
        (&predictions - &targets) * (2.0 / count)
    }
}

/// Policy objective `-mean(Q)`: maximizing the critic's value.
pub fn negative_mean(values: ArrayView2<f32>) -> (f32, Array2<f32>) {
    let count = values.len().max(1) as f32;
    let loss = -values.sum() / count;
    (loss, Array2::from_elem(values.raw_dim(), -1.0 / count))
}
