use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView4};
use serde::{Deserialize, Serialize};

use super::encoder::ConvEncoder;
use super::{flatten, record_dense};
use crate::activations::Activation;
use crate::control::HeadingController;
use crate::error::Result;
use crate::layers::{standard, DenseLayer, DropoutLayer, NamedTensor, NamedTensorMut, ParamLayer};
use crate::params::{Gradients, Parameterized};
use crate::policy;
use crate::replay_buffer::Observations;

const HIDDEN: usize = 512;
const RAW_OUTPUTS: usize = 2;

/// Which path an actor call takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorMode {
    /// Run the network and add the heading correction to its steering
    Perception,
    /// Skip the network: minimum throttle plus the heading correction
    ControlOnly,
}

/// Convolutional policy producing raw `[throttle, steering]` pre-activations.
#[derive(Serialize, Deserialize, Clone)]
pub struct PerceptionActor {
    encoder: ConvEncoder,
    dropout: DropoutLayer,
    lin1: DenseLayer,
    lin2: DenseLayer,
    pub max_action: f32,
    #[serde(skip)]
    raw: Option<Array2<f32>>,
}

impl PerceptionActor {
    pub fn new(
        input_hw: (usize, usize),
        conv_channels: usize,
        dropout: f32,
        max_action: f32,
    ) -> Result<Self> {
        let encoder = ConvEncoder::new(input_hw, conv_channels)?;
        let lin1 = DenseLayer::new(encoder.feature_len(), HIDDEN, Activation::leaky());
        Ok(PerceptionActor {
            encoder,
            dropout: DropoutLayer::new(dropout),
            lin1,
            lin2: DenseLayer::new(HIDDEN, RAW_OUTPUTS, Activation::Linear),
            max_action,
            raw: None,
        })
    }

    pub fn encoder(&self) -> &ConvEncoder {
        &self.encoder
    }

    /// Training-mode raw outputs; dropout active, batch statistics updated.
    pub fn forward_raw(&mut self, images: ArrayView4<f32>) -> Result<Array2<f32>> {
        self.encoder.check_input(&images)?;
        let features = flatten(self.encoder.forward(images).view())?;
        let dropped = self.dropout.forward(features.view());
        let hidden = self.lin1.forward(dropped.view());
        let raw = self.lin2.forward(hidden.view());
        self.raw = Some(raw.clone());
        Ok(raw)
    }

    pub fn infer_raw(&self, images: ArrayView4<f32>) -> Result<Array2<f32>> {
        self.encoder.check_input(&images)?;
        let features = flatten(self.encoder.infer(images).view())?;
        let hidden = self.lin1.infer(self.dropout.infer(features.view()).view());
        Ok(self.lin2.infer(hidden.view()))
    }

    /// Gradients of every parameter given the loss gradient on the raw outputs.
    pub fn backward_raw(&self, grad_raw: ArrayView2<f32>) -> Gradients {
        let mut grads = Gradients::new();

        let mut out = self.lin2.backward(grad_raw, true);
        let grad_hidden = out.input.take().expect("propagated gradient");
        record_dense(&mut grads, "lin2", out);

        let mut hidden = self.lin1.backward(grad_hidden.view(), true);
        let grad_dropped = hidden.input.take().expect("propagated gradient");
        record_dense(&mut grads, "lin1", hidden);

        let grad_features = standard(self.dropout.backward(grad_dropped.view()));
        let (c, h, w) = self.encoder.output_dim();
        let grad_maps = grad_features
            .into_shape((grad_raw.nrows(), c, h, w))
            .expect("feature gradient matches encoder output");
        self.encoder.backward(grad_maps.view(), "", &mut grads);
        grads
    }
}

/// The policy in one of its two configurations.
#[derive(Serialize, Deserialize, Clone)]
pub enum ActorNetwork {
    /// Heading controller only; no parameters
    Control,
    /// Learned perception policy with the controller added on top
    Perception(PerceptionActor),
}

impl ActorNetwork {
    /// Training-mode action batch `[batch, 2]`.
    pub fn forward(
        &mut self,
        states: &Observations,
        dist: ArrayView1<f32>,
        angle: ArrayView1<f32>,
        controller: &HeadingController,
        mode: ActorMode,
    ) -> Result<Array2<f32>> {
        match (self, mode) {
            (ActorNetwork::Perception(net), ActorMode::Perception) => {
                let raw = net.forward_raw(states.image()?)?;
                Ok(policy::compose(raw.view(), dist, angle, controller, net.max_action))
            }
            _ => Ok(control_action(states.batch_size(), dist, angle, controller)),
        }
    }

    /// Inference-mode action batch. Dropout is off and batch-norm uses running statistics.
    pub fn infer(
        &self,
        states: &Observations,
        dist: ArrayView1<f32>,
        angle: ArrayView1<f32>,
        controller: &HeadingController,
        mode: ActorMode,
    ) -> Result<Array2<f32>> {
        match (self, mode) {
            (ActorNetwork::Perception(net), ActorMode::Perception) => {
                let raw = net.infer_raw(states.image()?)?;
                Ok(policy::compose(raw.view(), dist, angle, controller, net.max_action))
            }
            _ => Ok(control_action(states.batch_size(), dist, angle, controller)),
        }
    }

    /// Parameter gradients for the last perception-mode `forward`, given ∂loss/∂action.
    ///
    /// The heading correction is a constant here. The control-only actor has no
    /// parameters and yields an empty map.
    pub fn backward(&self, grad_action: ArrayView2<f32>) -> Gradients {
        match self {
            ActorNetwork::Control => Gradients::new(),
            ActorNetwork::Perception(net) => {
                let raw = net
                    .raw
                    .as_ref()
                    .expect("forward must run in perception mode before backward");
                let grad_raw = policy::compose_backward(raw.view(), grad_action, net.max_action);
                net.backward_raw(grad_raw.view())
            }
        }
    }

    /// Whether the network consumes images at all.
    pub fn needs_images(&self) -> bool {
        matches!(self, ActorNetwork::Perception(_))
    }
}

fn control_action(
    batch_size: usize,
    dist: ArrayView1<f32>,
    angle: ArrayView1<f32>,
    controller: &HeadingController,
) -> Array2<f32> {
    let baseline = policy::control_baseline(batch_size);
    let correction = controller.compute_batch(dist, angle, baseline.column(policy::THROTTLE));
    policy::add_correction(baseline, correction.view())
}

impl Parameterized for ActorNetwork {
    fn parameters(&self) -> Vec<NamedTensor<'_>> {
        let mut out = Vec::new();
        if let ActorNetwork::Perception(net) = self {
            net.encoder.collect_parameters("", &mut out);
            net.lin1.collect_parameters("lin1", &mut out);
            net.lin2.collect_parameters("lin2", &mut out);
        }
        out
    }

    fn parameters_mut(&mut self) -> Vec<NamedTensorMut<'_>> {
        let mut out = Vec::new();
        if let ActorNetwork::Perception(net) = self {
            net.encoder.collect_parameters_mut("", &mut out);
            net.lin1.collect_parameters_mut("lin1", &mut out);
            net.lin2.collect_parameters_mut("lin2", &mut out);
        }
        out
    }

    fn buffers(&self) -> Vec<NamedTensor<'_>> {
        let mut out = Vec::new();
        if let ActorNetwork::Perception(net) = self {
            net.encoder.collect_buffers("", &mut out);
        }
        out
    }

    fn buffers_mut(&mut self) -> Vec<NamedTensorMut<'_>> {
        let mut out = Vec::new();
        if let ActorNetwork::Perception(net) = self {
            net.encoder.collect_buffers_mut("", &mut out);
        }
        out
    }
}
