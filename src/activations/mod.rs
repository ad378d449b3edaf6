//! # Activation Functions Module
//!
//! Element-wise non-linearities shared by the dense and convolutional layers.
//! Every activation works on arrays of any dimension, so the same enum drives
//! `[batch, features]` dense outputs and `[batch, channels, h, w]` feature maps.
//!
//! ## Available Activations
//!
//! - **ReLU**: `max(0, x)`, used by the dense critic
//! - **LeakyReLU**: ReLU with a small negative slope, used throughout the
//!   convolutional actor and critic (`alpha = 0.01`)
//! - **Linear**: identity, used on output projections
//!
//! The free [`sigmoid`] bounds the throttle when raw policy outputs are squashed.
//!
//! ## Usage Example
//!
//! ```rust
//! use lanepilot::activations::Activation;
//! use ndarray::array;
//!
//! let mut data = array![[1.0, -0.5], [0.0, 2.0]];
//! Activation::leaky().apply(&mut data);
//! assert!((data[[0, 1]] + 0.005).abs() < 1e-7);
//! ```

pub mod functions;

pub use functions::{sigmoid, Activation};
