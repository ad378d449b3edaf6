//! # lanepilot - DDPG training core for a lane-following robot
//!
//! Trains a driving agent with Deep Deterministic Policy Gradients. The actor
//! is hybrid: a convolutional policy proposes throttle and steering, and a
//! classical heading controller's correction is added to the steering, so the
//! network learns a residual on top of the control law.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lanepilot::agent::DdpgAgent;
//! use lanepilot::config::{DdpgBuilder, TrainParams};
//! use lanepilot::networks::ActorMode;
//! use lanepilot::replay_buffer::ReplayBuffer;
//! use ndarray::Array3;
//!
//! let mut agent = DdpgBuilder::new(&[3, 120, 160])
//!     .actor_variant_name("visual-policy")
//!     .max_action(1.0)
//!     .build()
//!     .unwrap();
//!
//! let mut buffer = ReplayBuffer::new(100_000);
//! // ... fill the buffer from the simulator ...
//! let stats = agent.train(&mut buffer, 100, &TrainParams::default()).unwrap();
//!
//! let frame = Array3::<f32>::zeros((3, 120, 160));
//! let action = agent.predict(frame.view().into_dyn(), 0.02, -0.1, ActorMode::Perception).unwrap();
//! ```
//!
//! ## Module Organization
//!
//! - [`activations`] - Element-wise non-linearities
//! - [`agent`] - The DDPG agent: predict, train, save and load
//! - [`config`] - Agent configuration, training hyperparameters and the builder
//! - [`control`] - The heading controller
//! - [`error`] - Error types and result handling
//! - [`layers`] - Dense, convolutional, batch-norm and dropout layers
//! - [`loss`] - Critic and actor objectives
//! - [`networks`] - Actor and critic networks
//! - [`optimizer`] - Adam and SGD
//! - [`params`] - State dicts, checkpoint files and soft updates
//! - [`policy`] - Turning raw network outputs into actions
//! - [`replay_buffer`] - Transitions, batches and the in-memory buffer
//! - [`trainer`] - Round-based training loop with checkpointing

pub mod activations;
pub mod agent;
pub mod config;
pub mod control;
pub mod error;
pub mod layers;
pub mod loss;
pub mod networks;
pub mod optimizer;
pub mod params;
pub mod policy;
pub mod replay_buffer;
pub mod trainer;

pub use agent::{DdpgAgent, TrainStats};
pub use config::{ActorVariant, CriticArchitecture, DdpgBuilder, DdpgConfig, TrainParams};
pub use control::HeadingController;
pub use error::{PilotError, Result};
pub use networks::ActorMode;
pub use params::{soft_update, Parameterized, StateDict};
pub use replay_buffer::{Observations, ReplayBuffer, Transition, TransitionBatch, TransitionSampler};
pub use trainer::{TrainingLoop, TrainingLoopConfig};
