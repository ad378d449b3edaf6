//! Building blocks for the actor and critic networks.
//!
//! Layers follow one convention: `forward` runs in training mode and caches
//! whatever `backward` needs, `infer` runs in inference mode through `&self`
//! and leaves no trace. Learnable tensors are exposed by name through
//! [`ParamLayer`] so networks can assemble state dicts, optimizers can find
//! their moments and target networks can be soft-updated tensor by tensor.

pub mod batch_norm;
pub mod conv;
pub mod dense;
pub mod dropout;
pub mod initialization;
pub mod traits;

pub use batch_norm::BatchNorm2d;
pub use conv::{Conv2DLayer, ConvGradients};
pub use dense::{DenseGradients, DenseLayer};
pub use dropout::DropoutLayer;
pub use initialization::fan_in_uniform;
pub use traits::{NamedTensor, NamedTensorMut, ParamLayer};

use ndarray::{Array, Dimension};

/// Returns `array` in row-major layout, copying only when needed.
///
/// `into_shape` reinterprets memory in the array's own order, so every reshape
/// after a transpose or matrix product goes through here first.
pub(crate) fn standard<D: Dimension>(array: Array<f32, D>) -> Array<f32, D> {
    if array.is_standard_layout() {
        array
    } else {
        array.as_standard_layout().into_owned()
    }
}
