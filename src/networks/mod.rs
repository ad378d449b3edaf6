//! Actor and critic networks.
//!
//! Both convolutional networks share the [`ConvEncoder`] layout but never its
//! parameters. Backward passes return gradients as a
//! [`Gradients`](crate::params::Gradients) map keyed exactly like the
//! network's parameters, which is what the optimizers consume.

pub mod actor;
pub mod critic;
pub mod encoder;

pub use actor::{ActorMode, ActorNetwork, PerceptionActor};
pub use critic::ActionValueCritic;
pub use encoder::ConvEncoder;

use ndarray::{Array2, ArrayView4};

use crate::error::Result;
use crate::layers::traits::tensor_name;
use crate::layers::DenseGradients;
use crate::params::Gradients;

/// Flattens a `[batch, c, h, w]` map to `[batch, c·h·w]`.
pub(crate) fn flatten(maps: ArrayView4<f32>) -> Result<Array2<f32>> {
    let (n, c, h, w) = maps.dim();
    let flat = maps
        .as_standard_layout()
        .into_owned()
        .into_shape((n, c * h * w))?;
    Ok(flat)
}

pub(crate) fn record_dense(grads: &mut Gradients, prefix: &str, dense: DenseGradients) {
    grads.insert(tensor_name(prefix, "weight"), dense.weights.into_dyn());
    grads.insert(tensor_name(prefix, "bias"), dense.biases.into_dyn());
}
