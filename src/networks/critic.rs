use ndarray::{concatenate, s, Array2, ArrayView2, Axis, CowArray, Ix2};
use serde::{Deserialize, Serialize};

use super::encoder::ConvEncoder;
use super::{flatten, record_dense};
use crate::activations::Activation;
use crate::config::CriticArchitecture;
use crate::error::{PilotError, Result};
use crate::layers::{standard, DenseLayer, NamedTensor, NamedTensorMut, ParamLayer};
use crate::params::{Gradients, Parameterized};
use crate::replay_buffer::Observations;

/// Q(s, a): estimates the discounted return of taking `a` in `s`.
///
/// The state is reduced to a feature vector (convolutional encoder, or plain
/// flattening for the dense architecture), passed through the first layer,
/// joined with the action and mapped to one unbounded value.
#[derive(Serialize, Deserialize, Clone)]
pub struct ActionValueCritic {
    architecture: CriticArchitecture,
    encoder: Option<ConvEncoder>,
    state_len: usize,
    first: DenseLayer,
    second: DenseLayer,
    head: DenseLayer,
}

impl ActionValueCritic {
    /// `state_dim` is `[3, h, w]`; the dense variant consumes its product.
    pub fn new(
        architecture: CriticArchitecture,
        state_dim: &[usize],
        action_dim: usize,
        conv_channels: usize,
    ) -> Result<Self> {
        let state_len = state_dim.iter().product();
        match architecture {
            CriticArchitecture::Convolutional => {
                let hw = match state_dim {
                    [_, h, w] => (*h, *w),
                    _ => {
                        return Err(PilotError::invalid_parameter(
                            "state_dim".to_string(),
                            format!("convolutional critic needs [3, h, w], got {:?}", state_dim),
                        ))
                    }
                };
                let encoder = ConvEncoder::new(hw, conv_channels)?;
                let first = DenseLayer::new(encoder.feature_len(), 256, Activation::leaky());
                Ok(ActionValueCritic {
                    architecture,
                    encoder: Some(encoder),
                    state_len,
                    first,
                    second: DenseLayer::new(256 + action_dim, 128, Activation::leaky()),
                    head: DenseLayer::new(128, 1, Activation::Linear),
                })
            }
            CriticArchitecture::Dense => Ok(ActionValueCritic {
                architecture,
                encoder: None,
                state_len,
                first: DenseLayer::new(state_len, 400, Activation::Relu),
                second: DenseLayer::new(400 + action_dim, 300, Activation::Relu),
                head: DenseLayer::new(300, 1, Activation::Linear),
            }),
        }
    }

    pub fn architecture(&self) -> CriticArchitecture {
        self.architecture
    }

    /// Whether states must arrive as images.
    pub fn needs_images(&self) -> bool {
        self.encoder.is_some()
    }

    fn layer_names(&self) -> [&'static str; 3] {
        match self.architecture {
            CriticArchitecture::Convolutional => ["lin1", "lin2", "lin3"],
            CriticArchitecture::Dense => ["l1", "l2", "l3"],
        }
    }

    fn flat_states(state_len: usize, states: &Observations) -> Result<CowArray<'_, f32, Ix2>> {
        let flat = states.flattened();
        if flat.ncols() != state_len {
            return Err(PilotError::dimension_mismatch(
                format!("{} state features", state_len),
                flat.ncols().to_string(),
            ));
        }
        Ok(flat)
    }

    fn check_actions(states: &Observations, actions: &ArrayView2<f32>) -> Result<()> {
        if actions.nrows() != states.batch_size() {
            return Err(PilotError::dimension_mismatch(
                format!("{} action rows", states.batch_size()),
                actions.nrows().to_string(),
            ));
        }
        Ok(())
    }

    /// Training-mode values `[batch, 1]`; caches for both backward passes.
    pub fn forward(&mut self, states: &Observations, actions: ArrayView2<f32>) -> Result<Array2<f32>> {
        Self::check_actions(states, &actions)?;
        let features = match self.encoder.as_mut() {
            Some(encoder) => {
                let images = states.image()?;
                encoder.check_input(&images)?;
                self.first.forward(flatten(encoder.forward(images).view())?.view())
            }
            None => {
                let flat = Self::flat_states(self.state_len, states)?;
                self.first.forward(flat.view())
            }
        };
        let joined = concatenate(Axis(1), &[features.view(), actions.view()])?;
        let hidden = self.second.forward(joined.view());
        Ok(self.head.forward(hidden.view()))
    }

    pub fn infer(&self, states: &Observations, actions: ArrayView2<f32>) -> Result<Array2<f32>> {
        Self::check_actions(states, &actions)?;
        let features = match &self.encoder {
            Some(encoder) => {
                let images = states.image()?;
                encoder.check_input(&images)?;
                self.first.infer(flatten(encoder.infer(images).view())?.view())
            }
            None => self.first.infer(Self::flat_states(self.state_len, states)?.view()),
        };
        let joined = concatenate(Axis(1), &[features.view(), actions.view()])?;
        Ok(self.head.infer(self.second.infer(joined.view()).view()))
    }

    /// Gradients of all critic parameters given ∂loss/∂Q.
    pub fn backward(&self, grad_value: ArrayView2<f32>) -> Gradients {
        let [first, second, head] = self.layer_names();
        let mut grads = Gradients::new();

        let mut out = self.head.backward(grad_value, true);
        let grad_hidden = out.input.take().expect("propagated gradient");
        record_dense(&mut grads, head, out);

        let mut joined = self.second.backward(grad_hidden.view(), true);
        let grad_joined = joined.input.take().expect("propagated gradient");
        record_dense(&mut grads, second, joined);

        let feature_width = self.first.output_size();
        let grad_features = grad_joined.slice(s![.., ..feature_width]);
        let mut features = self.first.backward(grad_features, self.encoder.is_some());
        let grad_encoded = features.input.take();
        record_dense(&mut grads, first, features);

        if let (Some(encoder), Some(grad_encoded)) = (&self.encoder, grad_encoded) {
            let (c, h, w) = encoder.output_dim();
            let grad_maps = standard(grad_encoded)
                .into_shape((grad_value.nrows(), c, h, w))
                .expect("feature gradient matches encoder output");
            encoder.backward(grad_maps.view(), "", &mut grads);
        }
        grads
    }

    /// ∂Q/∂action only. No parameter gradient is formed.
    pub fn backward_action(&self, grad_value: ArrayView2<f32>) -> Array2<f32> {
        let grad_hidden = self.head.input_gradient(grad_value);
        let grad_joined = self.second.input_gradient(grad_hidden.view());
        grad_joined
            .slice(s![.., self.first.output_size()..])
            .to_owned()
    }
}

impl Parameterized for ActionValueCritic {
    fn parameters(&self) -> Vec<NamedTensor<'_>> {
        let [first, second, head] = self.layer_names();
        let mut out = Vec::new();
        if let Some(encoder) = &self.encoder {
            encoder.collect_parameters("", &mut out);
        }
        self.first.collect_parameters(first, &mut out);
        self.second.collect_parameters(second, &mut out);
        self.head.collect_parameters(head, &mut out);
        out
    }

    fn parameters_mut(&mut self) -> Vec<NamedTensorMut<'_>> {
        let [first, second, head] = self.layer_names();
        let mut out = Vec::new();
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.collect_parameters_mut("", &mut out);
        }
        self.first.collect_parameters_mut(first, &mut out);
        self.second.collect_parameters_mut(second, &mut out);
        self.head.collect_parameters_mut(head, &mut out);
        out
    }

    fn buffers(&self) -> Vec<NamedTensor<'_>> {
        let mut out = Vec::new();
        if let Some(encoder) = &self.encoder {
            encoder.collect_buffers("", &mut out);
        }
        out
    }

    fn buffers_mut(&mut self) -> Vec<NamedTensorMut<'_>> {
        let mut out = Vec::new();
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.collect_buffers_mut("", &mut out);
        }
        out
    }
}
