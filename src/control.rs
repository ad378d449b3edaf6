//! Classical heading controller that the learned policy is layered on top of.

use ndarray::{Array1, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{PilotError, Result};

/// Stanley-style lateral control law.
///
/// Maps the robot's signed lateral offset from the lane centre, its heading
/// error and its current throttle to a steering correction. The controller is
/// stateless: the same inputs always give the same output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadingController {
    /// Gain on the lateral offset term
    pub distance_gain: f32,
    /// Gain on the heading error term
    pub angle_gain: f32,
    /// Added to `|throttle|` so the offset term stays finite at standstill
    pub speed_softening: f32,
    /// Symmetric clamp on the returned correction
    pub max_correction: f32,
}

impl Default for HeadingController {
    fn default() -> Self {
        HeadingController {
            distance_gain: 3.0,
            angle_gain: 1.0,
            speed_softening: 0.5,
            max_correction: 1.0,
        }
    }
}

impl HeadingController {
    pub fn validate(&self) -> Result<()> {
        let finite = [
            self.distance_gain,
            self.angle_gain,
            self.speed_softening,
            self.max_correction,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(PilotError::invalid_parameter(
                "heading",
                "gains must be finite",
            ));
        }
        if self.speed_softening <= 0.0 {
            return Err(PilotError::invalid_parameter(
                "heading.speed_softening",
                "must be positive",
            ));
        }
        if self.max_correction <= 0.0 {
            return Err(PilotError::invalid_parameter(
                "heading.max_correction",
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Steering correction for one robot state.
    pub fn compute(&self, lateral_distance: f32, heading_angle: f32, current_throttle: f32) -> f32 {
        let speed = current_throttle.abs() + self.speed_softening;
        let correction = -(self.angle_gain * heading_angle
            + (self.distance_gain * lateral_distance / speed).atan());
        // -0.0 would compare equal but print oddly in logs
        if correction == 0.0 {
            return 0.0;
        }
        correction.clamp(-self.max_correction, self.max_correction)
    }

    /// `compute` applied element-wise over batch-aligned inputs.
    pub fn compute_batch(
        &self,
        lateral_distance: ArrayView1<f32>,
        heading_angle: ArrayView1<f32>,
        current_throttle: ArrayView1<f32>,
    ) -> Array1<f32> {
        Zip::from(&lateral_distance)
            .and(&heading_angle)
            .and(&current_throttle)
            .map_collect(|&d, &a, &t| self.compute(d, a, t))
    }
}
