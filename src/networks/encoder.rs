use ndarray::{Array4, ArrayView4};
use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::error::{PilotError, Result};
use crate::layers::traits::tensor_name;
use crate::layers::{BatchNorm2d, Conv2DLayer, NamedTensor, NamedTensorMut, ParamLayer};
use crate::params::Gradients;

/// `(kernel, stride)` of each convolution stage.
const STAGES: [(usize, usize); 4] = [(8, 2), (4, 2), (4, 2), (4, 1)];

/// Channels every observation must carry.
pub const IMAGE_CHANNELS: usize = 3;

#[derive(Serialize, Deserialize, Clone)]
struct ConvStage {
    conv: Conv2DLayer,
    norm: BatchNorm2d,
}

/// Four conv → LeakyReLU → BatchNorm stages over `[batch, 3, h, w]` images.
#[derive(Serialize, Deserialize, Clone)]
pub struct ConvEncoder {
    stages: Vec<ConvStage>,
    input_hw: (usize, usize),
    output_dim: (usize, usize, usize),
}

impl ConvEncoder {
    /// Build an encoder for `(h, w)` images with `channels` filters per stage.
    pub fn new(input_hw: (usize, usize), channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(PilotError::invalid_parameter("conv_channels", "must be positive"));
        }

        let mut stages = Vec::with_capacity(STAGES.len());
        let mut hw = input_hw;
        let mut in_channels = IMAGE_CHANNELS;
        for &(kernel, stride) in STAGES.iter() {
            let conv = Conv2DLayer::new(
                in_channels,
                channels,
                (kernel, kernel),
                (stride, stride),
                Activation::leaky(),
            );
            hw = conv.output_hw(hw).ok_or_else(|| {
                PilotError::invalid_parameter(
                    "state_dim".to_string(),
                    format!("{}x{} images are too small for the encoder", input_hw.0, input_hw.1),
                )
            })?;
            stages.push(ConvStage {
                conv,
                norm: BatchNorm2d::new(channels),
            });
            in_channels = channels;
        }

        Ok(ConvEncoder {
            stages,
            input_hw,
            output_dim: (channels, hw.0, hw.1),
        })
    }

    /// `(channels, h, w)` of the encoded maps.
    pub fn output_dim(&self) -> (usize, usize, usize) {
        self.output_dim
    }

    /// Length of one flattened feature vector.
    pub fn feature_len(&self) -> usize {
        let (c, h, w) = self.output_dim;
        c * h * w
    }

    pub fn input_hw(&self) -> (usize, usize) {
        self.input_hw
    }

    pub fn check_input(&self, images: &ArrayView4<f32>) -> Result<()> {
        let (_, c, h, w) = images.dim();
        if c != IMAGE_CHANNELS {
            return Err(PilotError::InvalidObservation(format!(
                "expected {} channels in a channel-first image, got {}",
                IMAGE_CHANNELS, c
            )));
        }
        if (h, w) != self.input_hw {
            return Err(PilotError::dimension_mismatch(
                format!("{}x{} images", self.input_hw.0, self.input_hw.1),
                format!("{}x{}", h, w),
            ));
        }
        Ok(())
    }

    /// Training-mode pass. Updates batch-norm running statistics.
    pub fn forward(&mut self, images: ArrayView4<f32>) -> Array4<f32> {
        let mut stages = self.stages.iter_mut();
        let mut maps = match stages.next() {
            Some(first) => {
                let activated = first.conv.forward(images);
                first.norm.forward(activated.view())
            }
            None => images.to_owned(),
        };
        for stage in stages {
            let activated = stage.conv.forward(maps.view());
            maps = stage.norm.forward(activated.view());
        }
        maps
    }

    pub fn infer(&self, images: ArrayView4<f32>) -> Array4<f32> {
        let mut maps = images.to_owned();
        for stage in &self.stages {
            let activated = stage.conv.infer(maps.view());
            maps = stage.norm.infer(activated.view());
        }
        maps
    }

    /// Backpropagates from the encoded maps into every stage's parameters.
    pub fn backward(&self, grad_output: ArrayView4<f32>, prefix: &str, grads: &mut Gradients) {
        let mut grad = grad_output.to_owned();
        for (i, stage) in self.stages.iter().enumerate().rev() {
            let (grad_maps, grad_gamma, grad_beta) = stage.norm.backward(grad.view());
            let norm = stage_name(prefix, "bn", i);
            grads.insert(tensor_name(&norm, "weight"), grad_gamma.into_dyn());
            grads.insert(tensor_name(&norm, "bias"), grad_beta.into_dyn());

            let conv_grads = stage.conv.backward(grad_maps.view(), i > 0);
            let conv = stage_name(prefix, "conv", i);
            grads.insert(tensor_name(&conv, "weight"), conv_grads.kernels.into_dyn());
            grads.insert(tensor_name(&conv, "bias"), conv_grads.biases.into_dyn());

            match conv_grads.input {
                Some(input) => grad = input,
                None => break,
            }
        }
    }
}

fn stage_name(prefix: &str, kind: &str, index: usize) -> String {
    tensor_name(prefix, &format!("{}{}", kind, index + 1))
}

impl ParamLayer for ConvEncoder {
    fn collect_parameters<'a>(&'a self, prefix: &str, out: &mut Vec<NamedTensor<'a>>) {
        for (i, stage) in self.stages.iter().enumerate() {
            stage.conv.collect_parameters(&stage_name(prefix, "conv", i), out);
            stage.norm.collect_parameters(&stage_name(prefix, "bn", i), out);
        }
    }

    fn collect_parameters_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<NamedTensorMut<'a>>) {
        for (i, stage) in self.stages.iter_mut().enumerate() {
            stage.conv.collect_parameters_mut(&stage_name(prefix, "conv", i), out);
            stage.norm.collect_parameters_mut(&stage_name(prefix, "bn", i), out);
        }
    }

    fn collect_buffers<'a>(&'a self, prefix: &str, out: &mut Vec<NamedTensor<'a>>) {
        for (i, stage) in self.stages.iter().enumerate() {
            stage.norm.collect_buffers(&stage_name(prefix, "bn", i), out);
        }
    }

    fn collect_buffers_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<NamedTensorMut<'a>>) {
        for (i, stage) in self.stages.iter_mut().enumerate() {
            stage.norm.collect_buffers_mut(&stage_name(prefix, "bn", i), out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flattened_sizes() {
        let encoder = ConvEncoder::new((120, 160), 32).unwrap();
        assert_eq!(encoder.output_dim(), (32, 9, 14));
        assert_eq!(encoder.feature_len(), 32 * 9 * 14);

        let encoder = ConvEncoder::new((64, 64), 32).unwrap();
        assert_eq!(encoder.feature_len(), 32 * 2 * 2);
    }

    #[test]
    fn test_rejects_tiny_images() {
        assert!(ConvEncoder::new((32, 32), 8).is_err());
    }

    #[test]
    fn test_check_input() {
        let encoder = ConvEncoder::new((64, 64), 4).unwrap();
        let wrong_channels = Array4::<f32>::zeros((1, 1, 64, 64));
        assert!(matches!(
            encoder.check_input(&wrong_channels.view()),
            Err(PilotError::InvalidObservation(_))
        ));
        let wrong_size = Array4::<f32>::zeros((1, 3, 60, 64));
        assert!(matches!(
            encoder.check_input(&wrong_size.view()),
            Err(PilotError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_backward_fills_every_parameter() {
        let mut encoder = ConvEncoder::new((56, 56), 4).unwrap();
        let images = Array4::from_shape_fn((2, 3, 56, 56), |(b, c, y, x)| {
            ((b + c * 5 + y * 3 + x * 7) % 13) as f32 / 13.0
        });
        let out = encoder.forward(images.view());
        assert_eq!(out.dim(), (2, 4, 1, 1));

        let mut grads = Gradients::new();
        encoder.backward(Array4::ones(out.dim()).view(), "", &mut grads);

        let mut params = Vec::new();
        encoder.collect_parameters("", &mut params);
        assert_eq!(params.len(), 16);
        for (name, view) in params {
            let grad = grads.get(&name).expect("gradient for every parameter");
            assert_eq!(grad.shape(), view.shape());
        }
    }
}
