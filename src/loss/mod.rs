pub mod functions;

pub use functions::{negative_mean, Loss, MSE};
