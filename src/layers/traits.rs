use ndarray::{ArrayViewD, ArrayViewMutD};

/// A named, read-only view of one tensor.
pub type NamedTensor<'a> = (String, ArrayViewD<'a, f32>);

/// A named, writable view of one tensor.
pub type NamedTensorMut<'a> = (String, ArrayViewMutD<'a, f32>);

/// Exposes a layer's tensors under dotted names (`{prefix}.weight`, ...).
///
/// Parameters receive gradients and take part in soft updates. Buffers are
/// non-learnable running state that is saved with the layer but never
/// interpolated.
pub trait ParamLayer {
    fn collect_parameters<'a>(&'a self, prefix: &str, out: &mut Vec<NamedTensor<'a>>);

    fn collect_parameters_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<NamedTensorMut<'a>>);

    fn collect_buffers<'a>(&'a self, _prefix: &str, _out: &mut Vec<NamedTensor<'a>>) {}

    fn collect_buffers_mut<'a>(&'a mut self, _prefix: &str, _out: &mut Vec<NamedTensorMut<'a>>) {}
}

/// Joins a layer prefix and a tensor name.
pub fn tensor_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}
