//! Agent configuration: serde structs with defaults, validation and a builder.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::agent::DdpgAgent;
use crate::control::HeadingController;
use crate::error::{PilotError, Result};

/// Which actor the agent drives with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ActorVariant {
    /// Convolutional policy plus heading correction
    #[default]
    VisualPolicy,
    /// Heading controller alone
    ControlOnly,
}

impl FromStr for ActorVariant {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "visual-policy" => Ok(ActorVariant::VisualPolicy),
            "control-only" => Ok(ActorVariant::ControlOnly),
            other => Err(PilotError::invalid_parameter(
                "actor_variant".to_string(),
                format!("unknown variant '{}', expected 'visual-policy' or 'control-only'", other),
            )),
        }
    }
}

impl fmt::Display for ActorVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorVariant::VisualPolicy => write!(f, "visual-policy"),
            ActorVariant::ControlOnly => write!(f, "control-only"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CriticArchitecture {
    /// Conv encoder, then 256 → (+action) 128 → 1
    #[default]
    Convolutional,
    /// Flattened state, 400 → (+action) 300 → 1
    Dense,
}

impl FromStr for CriticArchitecture {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "convolutional" => Ok(CriticArchitecture::Convolutional),
            "dense" => Ok(CriticArchitecture::Dense),
            other => Err(PilotError::invalid_parameter(
                "critic_architecture".to_string(),
                format!("unknown architecture '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DdpgConfig {
    /// Observation shape, `[3, h, w]`
    pub state_dim: Vec<usize>,
    pub action_dim: usize,
    /// Throttle spans `[0.5, 0.5 + max_action]`
    pub max_action: f32,
    pub actor_variant: ActorVariant,
    pub critic_architecture: CriticArchitecture,
    /// State dict loaded into the critic before the targets are copied
    pub critic_checkpoint: Option<PathBuf>,
    /// Filters in every encoder stage
    pub conv_channels: usize,
    pub dropout: f32,
    pub actor_lr: f32,
    pub critic_lr: f32,
    pub optimizer: OptimizerKind,
    pub heading: HeadingController,
}

impl Default for DdpgConfig {
    fn default() -> Self {
        DdpgConfig {
            state_dim: vec![3, 120, 160],
            action_dim: 2,
            max_action: 1.0,
            actor_variant: ActorVariant::VisualPolicy,
            critic_architecture: CriticArchitecture::Convolutional,
            critic_checkpoint: None,
            conv_channels: 32,
            dropout: 0.5,
            actor_lr: 1e-4,
            critic_lr: 1e-3,
            optimizer: OptimizerKind::Adam,
            heading: HeadingController::default(),
        }
    }
}

impl DdpgConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: DdpgConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// `(h, w)` of the observation images.
    pub fn image_hw(&self) -> (usize, usize) {
        match self.state_dim.as_slice() {
            [_, h, w] => (*h, *w),
            _ => (0, 0),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.action_dim != 2 {
            return Err(PilotError::invalid_parameter(
                "action_dim".to_string(),
                format!("actions are [throttle, steering], got {} components", self.action_dim),
            ));
        }
        match self.state_dim.as_slice() {
            [3, h, w] if *h > 0 && *w > 0 => {}
            _ => {
                return Err(PilotError::invalid_parameter(
                    "state_dim".to_string(),
                    format!("expected [3, h, w], got {:?}", self.state_dim),
                ))
            }
        }
        if !(self.max_action.is_finite() && self.max_action > 0.0) {
            return Err(PilotError::invalid_parameter("max_action", "must be positive"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(PilotError::invalid_parameter("dropout", "must lie in [0, 1)"));
        }
        for (name, lr) in [("actor_lr", self.actor_lr), ("critic_lr", self.critic_lr)] {
            if !(lr.is_finite() && lr > 0.0) {
                return Err(PilotError::invalid_parameter(name, "must be positive"));
            }
        }
        if self.conv_channels == 0 {
            return Err(PilotError::invalid_parameter("conv_channels", "must be positive"));
        }
        self.heading.validate()
    }
}

/// Hyperparameters of one `train` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainParams {
    pub batch_size: usize,
    pub discount: f32,
    pub tau: f32,
}

impl Default for TrainParams {
    fn default() -> Self {
        TrainParams {
            batch_size: 64,
            discount: 0.99,
            tau: 0.001,
        }
    }
}

impl TrainParams {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PilotError::invalid_parameter("batch_size", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.discount) {
            return Err(PilotError::invalid_parameter("discount", "must lie in [0, 1]"));
        }
        if !(self.tau > 0.0 && self.tau <= 1.0) {
            return Err(PilotError::invalid_parameter("tau", "must lie in (0, 1]"));
        }
        Ok(())
    }
}

/// Fluent construction of a [`DdpgAgent`].
pub struct DdpgBuilder {
    config: DdpgConfig,
    variant_name: Option<String>,
}

impl DdpgBuilder {
    pub fn new(state_dim: &[usize]) -> Self {
        DdpgBuilder {
            config: DdpgConfig {
                state_dim: state_dim.to_vec(),
                ..DdpgConfig::default()
            },
            variant_name: None,
        }
    }

    pub fn from_config(config: DdpgConfig) -> Self {
        DdpgBuilder {
            config,
            variant_name: None,
        }
    }

    pub fn action_dim(mut self, action_dim: usize) -> Self {
        self.config.action_dim = action_dim;
        self
    }

    pub fn max_action(mut self, max_action: f32) -> Self {
        self.config.max_action = max_action;
        self
    }

    pub fn actor_variant(mut self, variant: ActorVariant) -> Self {
        self.config.actor_variant = variant;
        self.variant_name = None;
        self
    }

    /// Selects the actor by its config string; parsed in [`build`](Self::build).
    pub fn actor_variant_name(mut self, name: &str) -> Self {
        self.variant_name = Some(name.to_string());
        self
    }

    pub fn critic_architecture(mut self, architecture: CriticArchitecture) -> Self {
        self.config.critic_architecture = architecture;
        self
    }

    pub fn critic_checkpoint<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.critic_checkpoint = Some(path.into());
        self
    }

    pub fn conv_channels(mut self, channels: usize) -> Self {
        self.config.conv_channels = channels;
        self
    }

    pub fn dropout(mut self, rate: f32) -> Self {
        self.config.dropout = rate;
        self
    }

    pub fn learning_rates(mut self, actor_lr: f32, critic_lr: f32) -> Self {
        self.config.actor_lr = actor_lr;
        self.config.critic_lr = critic_lr;
        self
    }

    pub fn optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.config.optimizer = optimizer;
        self
    }

    pub fn heading(mut self, gains: HeadingController) -> Self {
        self.config.heading = gains;
        self
    }

    pub fn config(&self) -> &DdpgConfig {
        &self.config
    }

    pub fn build(mut self) -> Result<DdpgAgent> {
        if let Some(name) = self.variant_name.take() {
            self.config.actor_variant = name.parse()?;
        }
        DdpgAgent::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_strings() {
        assert_eq!("visual-policy".parse::<ActorVariant>().unwrap(), ActorVariant::VisualPolicy);
        assert_eq!("control-only".parse::<ActorVariant>().unwrap(), ActorVariant::ControlOnly);
        assert!(matches!(
            "dqn".parse::<ActorVariant>(),
            Err(PilotError::InvalidParameter { .. })
        ));
        assert_eq!(ActorVariant::ControlOnly.to_string(), "control-only");
    }

    #[test]
    fn test_defaults_validate() {
        let config = DdpgConfig::default();
        config.validate().unwrap();
        assert_eq!(config.image_hw(), (120, 160));
        TrainParams::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_action_dim_and_channels() {
        let config = DdpgConfig {
            action_dim: 3,
            ..DdpgConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DdpgConfig {
            state_dim: vec![1, 64, 64],
            ..DdpgConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_uses_defaults_and_kebab_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        fs::write(
            &path,
            r#"{"state_dim": [3, 64, 64], "actor_variant": "control-only", "critic_architecture": "dense"}"#,
        )
        .unwrap();
        let config = DdpgConfig::from_json_file(&path).unwrap();
        assert_eq!(config.state_dim, vec![3, 64, 64]);
        assert_eq!(config.actor_variant, ActorVariant::ControlOnly);
        assert_eq!(config.critic_architecture, CriticArchitecture::Dense);
        assert_eq!(config.critic_lr, 1e-3);
        assert_eq!(config.heading, HeadingController::default());
    }

    #[test]
    fn test_train_params_reject_bad_tau() {
        let params = TrainParams {
            tau: 0.0,
            ..TrainParams::default()
        };
        assert!(params.validate().is_err());
    }
}
