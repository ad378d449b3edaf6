use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::initialization::fan_in_uniform;
use super::traits::{tensor_name, NamedTensor, NamedTensorMut, ParamLayer};
use crate::activations::Activation;

/// A fully connected layer: `activation(x · W + b)` with `W` stored as `[in, out]`.
#[derive(Serialize, Deserialize, Clone)]
pub struct DenseLayer {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
    pub activation: Activation,
    #[serde(skip)]
    pre_activation_output: Option<Array2<f32>>,
    #[serde(skip)]
    inputs: Option<Array2<f32>>,
}

/// Gradients produced by [`DenseLayer::backward`].
pub struct DenseGradients {
    /// Gradient with respect to the layer input, when requested
    pub input: Option<Array2<f32>>,
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
}

impl DenseLayer {
    /// Create a dense layer with PyTorch-style fan-in uniform weights and biases.
    pub fn new(input_size: usize, output_size: usize, activation: Activation) -> Self {
        DenseLayer {
            weights: fan_in_uniform((input_size, output_size), input_size),
            biases: fan_in_uniform(output_size, input_size),
            activation,
            pre_activation_output: None,
            inputs: None,
        }
    }

    pub fn with_weights(mut self, weights: Array2<f32>) -> Self {
        assert_eq!(weights.dim(), self.weights.dim());
        self.weights = weights;
        self
    }

    pub fn with_biases(mut self, biases: Array1<f32>) -> Self {
        assert_eq!(biases.dim(), self.biases.dim());
        self.biases = biases;
        self
    }

    pub fn input_size(&self) -> usize {
        self.weights.nrows()
    }

    pub fn output_size(&self) -> usize {
        self.weights.ncols()
    }

    /// Training-mode forward pass over a `[batch, in]` input; caches for `backward`.
    pub fn forward(&mut self, inputs: ArrayView2<f32>) -> Array2<f32> {
        let pre_activation = self.affine(inputs);
        let mut outputs = pre_activation.clone();
        self.activation.apply(&mut outputs);
        self.inputs = Some(inputs.to_owned());
        self.pre_activation_output = Some(pre_activation);
        outputs
    }

    /// Inference-mode forward pass. Nothing is cached.
    pub fn infer(&self, inputs: ArrayView2<f32>) -> Array2<f32> {
        let mut outputs = self.affine(inputs);
        self.activation.apply(&mut outputs);
        outputs
    }

    fn affine(&self, inputs: ArrayView2<f32>) -> Array2<f32> {
        inputs.dot(&self.weights) + &self.biases
    }

    /// Output error scaled by the activation derivative.
    fn delta(&self, output_errors: ArrayView2<f32>) -> Array2<f32> {
        let pre_activation = self
            .pre_activation_output
            .as_ref()
            .expect("No pre-activation output stored. forward() must be called before backward()");
        output_errors.to_owned() * &self.activation.derivative(pre_activation)
    }

    /// Backpropagate a `[batch, out]` error; `propagate` also returns the input gradient.
    pub fn backward(&self, output_errors: ArrayView2<f32>, propagate: bool) -> DenseGradients {
        let inputs = self
            .inputs
            .as_ref()
            .expect("No inputs stored. forward() must be called before backward()");
        let delta = self.delta(output_errors);

        DenseGradients {
            input: propagate.then(|| delta.dot(&self.weights.t())),
            weights: inputs.t().dot(&delta),
            biases: delta.sum_axis(Axis(0)),
        }
    }

    /// Gradient with respect to the input only. Weight gradients are never formed.
    pub fn input_gradient(&self, output_errors: ArrayView2<f32>) -> Array2<f32> {
        self.delta(output_errors).dot(&self.weights.t())
    }
}

impl ParamLayer for DenseLayer {
    fn collect_parameters<'a>(&'a self, prefix: &str, out: &mut Vec<NamedTensor<'a>>) {
        out.push((tensor_name(prefix, "weight"), self.weights.view().into_dyn()));
        out.push((tensor_name(prefix, "bias"), self.biases.view().into_dyn()));
    }

    fn collect_parameters_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<NamedTensorMut<'a>>) {
        out.push((tensor_name(prefix, "weight"), self.weights.view_mut().into_dyn()));
        out.push((tensor_name(prefix, "bias"), self.biases.view_mut().into_dyn()));
    }
}
