use ndarray::{Array, Dimension, ShapeBuilder};
use ndarray_rand::RandomExt;
use rand_distr::Uniform;

/// `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`, PyTorch's default for conv and linear
/// weights and biases. Works for tensors of any rank.
pub fn fan_in_uniform<Sh, D>(shape: Sh, fan_in: usize) -> Array<f32, D>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
{
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    Array::random(shape, Uniform::new_inclusive(-bound, bound))
}
