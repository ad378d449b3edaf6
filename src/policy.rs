//! Post-processing that turns raw policy outputs into actions.
//!
//! Column 0 of an action batch is throttle, column 1 is steering. The learned
//! steering is bounded by `tanh`; the heading correction is then added on top,
//! so the final steering is a residual over the classical controller and is
//! not itself bounded.

use ndarray::{s, Array2, ArrayView1, ArrayView2};

use crate::activations::sigmoid;
use crate::control::HeadingController;

/// Lowest throttle any policy output can produce. The agent never reverses.
pub const MIN_THROTTLE: f32 = 0.5;

pub const THROTTLE: usize = 0;
pub const STEERING: usize = 1;

/// `0.5 + max_action · sigmoid(raw)`, in `[0.5, 0.5 + max_action]`.
#[inline]
pub fn throttle(raw: f32, max_action: f32) -> f32 {
    MIN_THROTTLE + max_action * sigmoid(raw)
}

/// Squashes a `[batch, 2]` raw output into bounded throttle and steering.
pub fn squash(raw: ArrayView2<f32>, max_action: f32) -> Array2<f32> {
    let mut action = raw.to_owned();
    action
        .column_mut(THROTTLE)
        .mapv_inplace(|v| throttle(v, max_action));
    action.column_mut(STEERING).mapv_inplace(f32::tanh);
    action
}

/// Adds the controller correction to the steering column.
pub fn add_correction(mut action: Array2<f32>, correction: ArrayView1<f32>) -> Array2<f32> {
    let mut steering = action.column_mut(STEERING);
    steering += &correction;
    action
}

/// Full action composition for a perception policy: squash the raw outputs,
/// evaluate the controller at the squashed throttle and add its correction to
/// the steering.
pub fn compose(
    raw: ArrayView2<f32>,
    dist: ArrayView1<f32>,
    angle: ArrayView1<f32>,
    controller: &HeadingController,
    max_action: f32,
) -> Array2<f32> {
    let squashed = squash(raw, max_action);
    let correction = controller.compute_batch(dist, angle, squashed.column(THROTTLE));
    add_correction(squashed, correction.view())
}

/// The action a parameterless control-only policy starts from: constant
/// minimum throttle and zero steering.
pub fn control_baseline(batch_size: usize) -> Array2<f32> {
    let mut action = Array2::zeros((batch_size, 2));
    action.column_mut(THROTTLE).fill(MIN_THROTTLE);
    action
}

/// Gradient of a loss with respect to the raw outputs, given its gradient with
/// respect to the composed action.
///
/// The correction is treated as a constant: its dependence on the squashed
/// throttle is not differentiated.
pub fn compose_backward(
    raw: ArrayView2<f32>,
    grad_action: ArrayView2<f32>,
    max_action: f32,
) -> Array2<f32> {
    let mut grad = grad_action.to_owned();
    grad.slice_mut(s![.., THROTTLE])
        .zip_mut_with(&raw.slice(s![.., THROTTLE]), |g, &r| {
            let sg = sigmoid(r);
            *g *= max_action * sg * (1.0 - sg);
        });
    grad.slice_mut(s![.., STEERING])
        .zip_mut_with(&raw.slice(s![.., STEERING]), |g, &r| {
            let t = r.tanh();
            *g *= 1.0 - t * t;
        });
    grad
}
