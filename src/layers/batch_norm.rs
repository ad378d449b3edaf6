use ndarray::{Array1, Array2, Array4, ArrayView4, Axis};
use serde::{Deserialize, Serialize};

use super::standard;
use super::traits::{tensor_name, NamedTensor, NamedTensorMut, ParamLayer};

/// Batch normalization over the channel axis of `[batch, channels, h, w]` maps.
///
/// Statistics are taken per channel over the batch and both spatial axes.
/// `forward` normalizes with batch statistics and folds them into the running
/// estimates; `infer` normalizes with the running estimates only.
#[derive(Serialize, Deserialize, Clone)]
pub struct BatchNorm2d {
    /// Scale parameter (gamma)
    pub gamma: Array1<f32>,

    /// Shift parameter (beta)
    pub beta: Array1<f32>,

    pub running_mean: Array1<f32>,

    /// Running unbiased variance
    pub running_var: Array1<f32>,

    pub momentum: f32,

    pub epsilon: f32,

    #[serde(skip)]
    cache: Option<NormCache>,
}

#[derive(Clone)]
struct NormCache {
    normalized: Array2<f32>,
    inv_std: Array1<f32>,
    input_dim: (usize, usize, usize, usize),
}

/// Moves channels to the front and flattens the rest: `[n, c, h, w] -> [c, n·h·w]`.
fn channel_rows(input: ArrayView4<f32>) -> Array2<f32> {
    let (n, c, h, w) = input.dim();
    standard(input.permuted_axes([1, 0, 2, 3]).to_owned())
        .into_shape((c, n * h * w))
        .expect("channel rows are contiguous")
}

fn from_channel_rows(rows: Array2<f32>, (n, c, h, w): (usize, usize, usize, usize)) -> Array4<f32> {
    let maps = standard(rows)
        .into_shape((c, n, h, w))
        .expect("channel rows are contiguous");
    standard(maps.permuted_axes([1, 0, 2, 3]))
}

impl BatchNorm2d {
    pub fn new(num_features: usize) -> Self {
        Self::with_hyperparameters(num_features, 0.1, 1e-5)
    }

    pub fn with_hyperparameters(num_features: usize, momentum: f32, epsilon: f32) -> Self {
        BatchNorm2d {
            gamma: Array1::ones(num_features),
            beta: Array1::zeros(num_features),
            running_mean: Array1::zeros(num_features),
            running_var: Array1::ones(num_features),
            momentum,
            epsilon,
            cache: None,
        }
    }

    pub fn num_features(&self) -> usize {
        self.gamma.len()
    }

    fn scale_shift(&self, normalized: &Array2<f32>) -> Array2<f32> {
        normalized * &self.gamma.view().insert_axis(Axis(1)) + &self.beta.view().insert_axis(Axis(1))
    }

    /// Training-mode pass: batch statistics, running-statistic update, cache for `backward`.
    pub fn forward(&mut self, input: ArrayView4<f32>) -> Array4<f32> {
        let input_dim = input.dim();
        let rows = channel_rows(input);
        let count = rows.ncols();

        let mean = rows
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(rows.nrows()));
        let centered = rows - &mean.view().insert_axis(Axis(1));
        let var = centered
            .mapv(|v| v * v)
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(centered.nrows()));
        let inv_std = var.mapv(|v| 1.0 / (v + self.epsilon).sqrt());
        let normalized = centered * &inv_std.view().insert_axis(Axis(1));

        let unbiased = if count > 1 {
            &var * (count as f32 / (count - 1) as f32)
        } else {
            var
        };
        let m = self.momentum;
        self.running_mean = &self.running_mean * (1.0 - m) + &mean * m;
        self.running_var = &self.running_var * (1.0 - m) + &unbiased * m;

        let output = from_channel_rows(self.scale_shift(&normalized), input_dim);
        self.cache = Some(NormCache {
            normalized,
            inv_std,
            input_dim,
        });
        output
    }

    /// Inference-mode pass with the running statistics.
    pub fn infer(&self, input: ArrayView4<f32>) -> Array4<f32> {
        let input_dim = input.dim();
        let rows = channel_rows(input);
        let inv_std = self.running_var.mapv(|v| 1.0 / (v + self.epsilon).sqrt());
        let normalized = (rows - &self.running_mean.view().insert_axis(Axis(1)))
            * &inv_std.view().insert_axis(Axis(1));
        from_channel_rows(self.scale_shift(&normalized), input_dim)
    }

    /// Returns `(input_grad, gamma_grad, beta_grad)` for the last training-mode pass.
    pub fn backward(&self, grad_output: ArrayView4<f32>) -> (Array4<f32>, Array1<f32>, Array1<f32>) {
        let cache = self
            .cache
            .as_ref()
            .expect("Forward must be called before backward.");
        let grad = channel_rows(grad_output);
        let count = grad.ncols() as f32;
        let xhat = &cache.normalized;

        let grad_gamma = (&grad * xhat).sum_axis(Axis(1));
        let grad_beta = grad.sum_axis(Axis(1));

        let grad_xhat = grad * &self.gamma.view().insert_axis(Axis(1));
        let sum_grad = grad_xhat.sum_axis(Axis(1)).insert_axis(Axis(1));
        let sum_grad_xhat = (&grad_xhat * xhat).sum_axis(Axis(1)).insert_axis(Axis(1));

        let grad_input = (grad_xhat * count - &sum_grad - xhat * &sum_grad_xhat)
            * &(&cache.inv_std / count).insert_axis(Axis(1));

        (
            from_channel_rows(grad_input, cache.input_dim),
            grad_gamma,
            grad_beta,
        )
    }
}

impl ParamLayer for BatchNorm2d {
    fn collect_parameters<'a>(&'a self, prefix: &str, out: &mut Vec<NamedTensor<'a>>) {
        out.push((tensor_name(prefix, "weight"), self.gamma.view().into_dyn()));
        out.push((tensor_name(prefix, "bias"), self.beta.view().into_dyn()));
    }

    fn collect_parameters_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<NamedTensorMut<'a>>) {
        out.push((tensor_name(prefix, "weight"), self.gamma.view_mut().into_dyn()));
        out.push((tensor_name(prefix, "bias"), self.beta.view_mut().into_dyn()));
    }

    fn collect_buffers<'a>(&'a self, prefix: &str, out: &mut Vec<NamedTensor<'a>>) {
        out.push((tensor_name(prefix, "running_mean"), self.running_mean.view().into_dyn()));
        out.push((tensor_name(prefix, "running_var"), self.running_var.view().into_dyn()));
    }

    fn collect_buffers_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<NamedTensorMut<'a>>) {
        out.push((tensor_name(prefix, "running_mean"), self.running_mean.view_mut().into_dyn()));
        out.push((tensor_name(prefix, "running_var"), self.running_var.view_mut().into_dyn()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maps() -> Array4<f32> {
        Array4::from_shape_fn((3, 2, 2, 2), |(b, c, y, x)| {
            (b as f32) * 0.7 + (c as f32) * 2.0 - (y as f32) * 0.3 + (x as f32) * 0.45
        })
    }

    #[test]
    fn test_training_output_is_normalized_per_channel() {
        let mut bn = BatchNorm2d::new(2);
        let out = bn.forward(maps().view());
        for c in 0..2 {
            let channel = out.index_axis(Axis(1), c);
            let mean = channel.mean().unwrap();
            let var = channel.mapv(|v| (v - mean).powi(2)).mean().unwrap();
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_running_statistics_update() {
        let mut bn = BatchNorm2d::new(2);
        let input = maps();
        bn.forward(input.view());

        let channel0 = input.index_axis(Axis(1), 0).to_owned();
        let mean = channel0.mean().unwrap();
        let count = channel0.len() as f32;
        let unbiased = channel0.mapv(|v| (v - mean).powi(2)).sum() / (count - 1.0);

        assert!((bn.running_mean[0] - 0.1 * mean).abs() < 1e-5);
        assert!((bn.running_var[0] - (0.9 + 0.1 * unbiased)).abs() < 1e-5);
    }

    #[test]
    fn test_infer_uses_running_statistics() {
        let mut bn = BatchNorm2d::new(2);
        bn.running_mean = Array1::from(vec![1.0, -1.0]);
        bn.running_var = Array1::from(vec![4.0, 1.0]);
        let input = Array4::from_elem((1, 2, 1, 1), 3.0);
        let out = bn.infer(input.view());
        assert!((out[[0, 0, 0, 0]] - 2.0 / (4.0f32 + 1e-5).sqrt()).abs() < 1e-5);
        assert!((out[[0, 1, 0, 0]] - 4.0 / (1.0f32 + 1e-5).sqrt()).abs() < 1e-4);
    }

    #[test]
    fn test_input_gradient_matches_finite_differences() {
        let mut bn = BatchNorm2d::new(2);
        bn.gamma = Array1::from(vec![1.5, 0.5]);
        let input = maps();
        // Weighted sum so the loss is not invariant to normalization.
        let weights = Array4::from_shape_fn(input.dim(), |(b, c, y, x)| {
            ((b + 2 * c + 3 * y + x) % 5) as f32 - 2.0
        });
        let loss = |bn: &mut BatchNorm2d, x: &Array4<f32>| (bn.forward(x.view()) * &weights).sum();

        loss(&mut bn, &input);
        let (grad_input, grad_gamma, grad_beta) = bn.backward(weights.view());

        let eps = 5e-3;
        let mut up = input.clone();
        up[[1, 0, 1, 0]] += eps;
        let mut down = input.clone();
        down[[1, 0, 1, 0]] -= eps;
        let numeric = (loss(&mut bn.clone(), &up) - loss(&mut bn.clone(), &down)) / (2.0 * eps);
        assert!((numeric - grad_input[[1, 0, 1, 0]]).abs() < 2e-2);

        assert!((grad_beta[1] - weights.index_axis(Axis(1), 1).sum()).abs() < 1e-5);
        assert_eq!(grad_gamma.len(), 2);
    }

    #[test]
    fn test_buffers_are_named_separately() {
        let bn = BatchNorm2d::new(4);
        let mut params = Vec::new();
        let mut buffers = Vec::new();
        bn.collect_parameters("bn1", &mut params);
        bn.collect_buffers("bn1", &mut buffers);
        let names: Vec<_> = params.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["bn1.weight", "bn1.bias"]);
        let names: Vec<_> = buffers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["bn1.running_mean", "bn1.running_var"]);
    }
}
