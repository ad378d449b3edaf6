#![allow(dead_code)]

use lanepilot::config::{ActorVariant, CriticArchitecture, DdpgConfig};
use lanepilot::replay_buffer::{ReplayBuffer, Transition};
use ndarray::{array, Array3};

/// Smallest image side the encoder accepts comfortably.
pub const SIDE: usize = 56;

pub fn small_config() -> DdpgConfig {
    DdpgConfig {
        state_dim: vec![3, SIDE, SIDE],
        conv_channels: 4,
        ..DdpgConfig::default()
    }
}

pub fn config_with(actor: ActorVariant, critic: CriticArchitecture) -> DdpgConfig {
    DdpgConfig {
        actor_variant: actor,
        critic_architecture: critic,
        ..small_config()
    }
}

/// A smooth synthetic camera frame that differs per `seed`.
pub fn frame(h: usize, w: usize, seed: usize) -> Array3<f32> {
    let phase = seed as f32 * 0.37;
    Array3::from_shape_fn((3, h, w), |(c, y, x)| {
        0.5 + 0.5 * ((x as f32 * 0.11 + y as f32 * 0.07 + c as f32 + phase).sin())
    })
}

pub fn synthetic_buffer(count: usize, h: usize, w: usize, seed: u64) -> ReplayBuffer {
    let mut buffer = ReplayBuffer::with_seed(count, seed);
    for i in 0..count {
        let dist = ((i % 7) as f32 - 3.0) * 0.02;
        let angle = ((i % 5) as f32 - 2.0) * 0.1;
        buffer
            .add(Transition {
                state: frame(h, w, i).into_dyn(),
                action: array![0.5 + (i % 3) as f32 * 0.2, ((i % 9) as f32 - 4.0) * 0.1],
                reward: 1.0 - dist.abs() * 10.0 - angle.abs(),
                next_state: frame(h, w, i + 1).into_dyn(),
                done: i % 10 == 9,
                dist,
                angle,
                next_dist: dist * 0.9,
                next_angle: angle * 0.9,
            })
            .expect("consistent synthetic transitions");
    }
    buffer
}
