//! 2D convolution over channel-first image batches.
//!
//! The convolution is lowered to a matrix product (im2col): every receptive
//! field becomes one row of a `[batch·out_h·out_w, in_channels·k_h·k_w]`
//! matrix, so forward and both gradients reduce to `dot` calls.

use ndarray::{s, Array1, Array2, Array4, Array6, ArrayView4, Axis};
use serde::{Deserialize, Serialize};

use super::initialization::fan_in_uniform;
use super::standard;
use super::traits::{tensor_name, NamedTensor, NamedTensorMut, ParamLayer};
use crate::activations::Activation;

/// 2D convolutional layer without padding, followed by an element-wise activation.
#[derive(Serialize, Deserialize, Clone)]
pub struct Conv2DLayer {
    /// Convolution kernels `[out_channels, in_channels, kernel_h, kernel_w]`
    pub kernels: Array4<f32>,

    /// Bias terms for each output channel
    pub biases: Array1<f32>,

    pub activation: Activation,

    pub stride: (usize, usize),

    pub in_channels: usize,

    pub out_channels: usize,

    pub kernel_size: (usize, usize),

    #[serde(skip)]
    cache: Option<ConvCache>,
}

#[derive(Clone)]
struct ConvCache {
    cols: Array2<f32>,
    pre_activation: Array4<f32>,
    input_dim: (usize, usize, usize, usize),
}

/// Gradients produced by [`Conv2DLayer::backward`].
pub struct ConvGradients {
    pub input: Option<Array4<f32>>,
    pub kernels: Array4<f32>,
    pub biases: Array1<f32>,
}

impl Conv2DLayer {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        stride: (usize, usize),
        activation: Activation,
    ) -> Self {
        let fan_in = in_channels * kernel_size.0 * kernel_size.1;

        Conv2DLayer {
            kernels: fan_in_uniform(
                (out_channels, in_channels, kernel_size.0, kernel_size.1),
                fan_in,
            ),
            biases: fan_in_uniform(out_channels, fan_in),
            activation,
            stride,
            in_channels,
            out_channels,
            kernel_size,
            cache: None,
        }
    }

    /// Spatial output size for an `(h, w)` input, or `None` if the kernel does not fit.
    pub fn output_hw(&self, (h, w): (usize, usize)) -> Option<(usize, usize)> {
        conv_output_hw((h, w), self.kernel_size, self.stride)
    }

    fn receptive_fields(&self, input: ArrayView4<f32>) -> (Array2<f32>, usize, usize) {
        let (n, c, h, w) = input.dim();
        let (kh, kw) = self.kernel_size;
        let (sh, sw) = self.stride;
        let (oh, ow) = self
            .output_hw((h, w))
            .expect("input smaller than the convolution kernel");

        let mut cols = Array6::<f32>::zeros((n, oh, ow, c, kh, kw));
        for i in 0..kh {
            for j in 0..kw {
                let patch = input.slice(s![
                    ..,
                    ..,
                    i..i + sh * (oh - 1) + 1;sh,
                    j..j + sw * (ow - 1) + 1;sw
                ]);
                cols.slice_mut(s![.., .., .., .., i, j])
                    .assign(&patch.permuted_axes([0, 2, 3, 1]));
            }
        }

        let cols = cols
            .into_shape((n * oh * ow, c * kh * kw))
            .expect("im2col buffer is contiguous");
        (cols, oh, ow)
    }

    fn kernel_matrix(&self) -> Array2<f32> {
        let (kh, kw) = self.kernel_size;
        standard(self.kernels.clone())
            .into_shape((self.out_channels, self.in_channels * kh * kw))
            .expect("kernel tensor is contiguous")
    }

    fn convolve(&self, cols: &Array2<f32>, n: usize, oh: usize, ow: usize) -> Array4<f32> {
        let out = cols.dot(&self.kernel_matrix().t()) + &self.biases;
        let out = standard(out)
            .into_shape((n, oh, ow, self.out_channels))
            .expect("convolution output is contiguous");
        standard(out.permuted_axes([0, 3, 1, 2]))
    }

    /// Training-mode forward pass over `[batch, channels, h, w]`; caches for `backward`.
    pub fn forward(&mut self, input: ArrayView4<f32>) -> Array4<f32> {
        let input_dim = input.dim();
        let (cols, oh, ow) = self.receptive_fields(input);
        let pre_activation = self.convolve(&cols, input_dim.0, oh, ow);
        let mut output = pre_activation.clone();
        self.activation.apply(&mut output);
        self.cache = Some(ConvCache {
            cols,
            pre_activation,
            input_dim,
        });
        output
    }

    /// Inference-mode forward pass. Nothing is cached.
    pub fn infer(&self, input: ArrayView4<f32>) -> Array4<f32> {
        let n = input.dim().0;
        let (cols, oh, ow) = self.receptive_fields(input);
        let mut output = self.convolve(&cols, n, oh, ow);
        self.activation.apply(&mut output);
        output
    }

    /// Backpropagate `[batch, out_channels, out_h, out_w]` errors.
    ///
    /// The input gradient is only formed when `propagate` is set; the first layer
    /// of an encoder sits on raw observations and never needs it.
    pub fn backward(&self, output_gradient: ArrayView4<f32>, propagate: bool) -> ConvGradients {
        let cache = self
            .cache
            .as_ref()
            .expect("Forward pass must be called before backward");

        let delta = output_gradient.to_owned() * &self.activation.derivative(&cache.pre_activation);
        let (n, oc, oh, ow) = delta.dim();
        let delta = standard(delta.permuted_axes([0, 2, 3, 1]))
            .into_shape((n * oh * ow, oc))
            .expect("gradient buffer is contiguous");

        let kernels = standard(delta.t().dot(&cache.cols))
            .into_shape(self.kernels.raw_dim())
            .expect("kernel gradient matches kernel shape");
        let biases = delta.sum_axis(Axis(0));
        let input = propagate.then(|| self.scatter_fields(delta.dot(&self.kernel_matrix()), cache.input_dim));

        ConvGradients {
            input,
            kernels,
            biases,
        }
    }

    /// Inverse of `receptive_fields`: sums each row of field gradients back onto the input grid.
    fn scatter_fields(&self, field_grads: Array2<f32>, (n, c, h, w): (usize, usize, usize, usize)) -> Array4<f32> {
        let (kh, kw) = self.kernel_size;
        let (sh, sw) = self.stride;
        let (oh, ow) = self
            .output_hw((h, w))
            .expect("cached input fits the kernel");

        let field_grads = standard(field_grads)
            .into_shape((n, oh, ow, c, kh, kw))
            .expect("field gradient buffer is contiguous");

        let mut grad = Array4::<f32>::zeros((n, c, h, w));
        for i in 0..kh {
            for j in 0..kw {
                let patch = field_grads
                    .slice(s![.., .., .., .., i, j])
                    .permuted_axes([0, 3, 1, 2]);
                let mut target = grad.slice_mut(s![
                    ..,
                    ..,
                    i..i + sh * (oh - 1) + 1;sh,
                    j..j + sw * (ow - 1) + 1;sw
                ]);
                target += &patch;
            }
        }
        grad
    }
}

/// Output size of an unpadded convolution.
pub fn conv_output_hw(
    (h, w): (usize, usize),
    (kh, kw): (usize, usize),
    (sh, sw): (usize, usize),
) -> Option<(usize, usize)> {
    if sh == 0 || sw == 0 {
        return None;
    }
    let oh = h.checked_sub(kh)? / sh + 1;
    let ow = w.checked_sub(kw)? / sw + 1;
    Some((oh, ow))
}

impl ParamLayer for Conv2DLayer {
    fn collect_parameters<'a>(&'a self, prefix: &str, out: &mut Vec<NamedTensor<'a>>) {
        out.push((tensor_name(prefix, "weight"), self.kernels.view().into_dyn()));
        out.push((tensor_name(prefix, "bias"), self.biases.view().into_dyn()));
    }

    fn collect_parameters_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<NamedTensorMut<'a>>) {
        out.push((tensor_name(prefix, "weight"), self.kernels.view_mut().into_dyn()));
        out.push((tensor_name(prefix, "bias"), self.biases.view_mut().into_dyn()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    /// Direct nested-loop convolution used as the reference.
    fn reference_conv(layer: &Conv2DLayer, input: &Array4<f32>) -> Array4<f32> {
        let (n, _, h, w) = input.dim();
        let (oh, ow) = layer.output_hw((h, w)).unwrap();
        let (kh, kw) = layer.kernel_size;
        let mut out = Array4::zeros((n, layer.out_channels, oh, ow));
        for b in 0..n {
            for oc in 0..layer.out_channels {
                for y in 0..oh {
                    for x in 0..ow {
                        let mut sum = layer.biases[oc];
                        for ic in 0..layer.in_channels {
                            for i in 0..kh {
                                for j in 0..kw {
                                    sum += input[[b, ic, y * layer.stride.0 + i, x * layer.stride.1 + j]]
                                        * layer.kernels[[oc, ic, i, j]];
                                }
                            }
                        }
                        out[[b, oc, y, x]] = sum;
                    }
                }
            }
        }
        out
    }

    fn sample_input() -> Array4<f32> {
        Array4::from_shape_fn((2, 3, 9, 7), |(b, c, y, x)| {
            ((b * 31 + c * 7 + y * 3 + x) % 11) as f32 * 0.1 - 0.5
        })
    }

    #[test]
    fn test_output_shape() {
        assert_eq!(conv_output_hw((120, 160), (8, 8), (2, 2)), Some((57, 77)));
        assert_eq!(conv_output_hw((64, 64), (8, 8), (2, 2)), Some((29, 29)));
        assert_eq!(conv_output_hw((4, 4), (8, 8), (2, 2)), None);
    }

    #[test]
    fn test_forward_matches_reference() {
        let mut layer = Conv2DLayer::new(3, 4, (3, 3), (2, 2), Activation::Linear);
        let input = sample_input();
        let expected = reference_conv(&layer, &input);
        let actual = layer.forward(input.view());
        assert_eq!(actual.dim(), expected.dim());
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-4);
        }
        assert_eq!(layer.infer(input.view()), actual);
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let mut layer = Conv2DLayer::new(3, 2, (3, 3), (2, 1), Activation::Linear);
        let input = sample_input();
        let out = layer.forward(input.view());
        // Loss = sum(out), so every output gradient is one.
        let grads = layer.backward(Array4::ones(out.dim()).view(), true);

        let eps = 0.1;
        let base = reference_conv(&layer, &input).sum();

        let mut bumped = layer.clone();
        bumped.kernels[[1, 2, 0, 1]] += eps;
        let numeric = (reference_conv(&bumped, &input).sum() - base) / eps;
        assert!((numeric - grads.kernels[[1, 2, 0, 1]]).abs() < 1e-2);

        let mut shifted = input.clone();
        shifted[[1, 0, 4, 3]] += eps;
        let numeric = (reference_conv(&layer, &shifted).sum() - base) / eps;
        let analytic = grads.input.unwrap()[[1, 0, 4, 3]];
        assert!((numeric - analytic).abs() < 1e-2);

        let out_positions = (out.dim().0 * out.dim().2 * out.dim().3) as f32;
        assert!((grads.biases[0] - out_positions).abs() < 1e-4);
    }

    #[test]
    fn test_first_layer_skips_input_gradient() {
        let mut layer = Conv2DLayer::new(3, 2, (3, 3), (1, 1), Activation::leaky());
        let input = sample_input();
        let out = layer.forward(input.view());
        let grads = layer.backward(Array4::ones(out.dim()).view(), false);
        assert!(grads.input.is_none());
    }
}
