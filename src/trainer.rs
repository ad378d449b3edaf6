//! Round-based driver around [`DdpgAgent::train`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent::{DdpgAgent, TrainStats};
use crate::config::TrainParams;
use crate::error::{PilotError, Result};
use crate::replay_buffer::TransitionSampler;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingLoopConfig {
    pub rounds: usize,
    pub iterations_per_round: usize,
    pub train: TrainParams,
    /// Save every this many rounds; `0` never saves
    pub checkpoint_every: usize,
    pub checkpoint_dir: PathBuf,
    pub checkpoint_name: String,
}

impl Default for TrainingLoopConfig {
    fn default() -> Self {
        TrainingLoopConfig {
            rounds: 10,
            iterations_per_round: 100,
            train: TrainParams::default(),
            checkpoint_every: 0,
            checkpoint_dir: PathBuf::from("checkpoints"),
            checkpoint_name: "ddpg".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    pub round: usize,
    pub mean_critic_loss: f32,
    pub mean_actor_loss: f32,
    /// Whether a checkpoint was written after this round
    pub checkpointed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSummary {
    pub rounds: Vec<RoundSummary>,
    pub total_iterations: usize,
}

impl TrainingSummary {
    pub fn last(&self) -> Option<&RoundSummary> {
        self.rounds.last()
    }
}

pub struct TrainingLoop {
    config: TrainingLoopConfig,
}

impl TrainingLoop {
    pub fn new(config: TrainingLoopConfig) -> Result<Self> {
        if config.iterations_per_round == 0 {
            return Err(PilotError::invalid_parameter(
                "iterations_per_round",
                "must be positive",
            ));
        }
        config.train.validate()?;
        Ok(TrainingLoop { config })
    }

    pub fn config(&self) -> &TrainingLoopConfig {
        &self.config
    }

    pub fn run<S>(&self, agent: &mut DdpgAgent, sampler: &mut S) -> Result<TrainingSummary>
    where
        S: TransitionSampler + ?Sized,
    {
        self.run_with(agent, sampler, |_, _| Ok(()))
    }

    /// Like [`run`](Self::run), calling `hook` after each round. The hook may
    /// refill the sampler or abort the loop by returning an error.
    pub fn run_with<S, F>(&self, agent: &mut DdpgAgent, sampler: &mut S, mut hook: F) -> Result<TrainingSummary>
    where
        S: TransitionSampler + ?Sized,
        F: FnMut(&RoundSummary, &mut S) -> Result<()>,
    {
        let mut summary = TrainingSummary::default();
        for round in 0..self.config.rounds {
            let stats = agent.train(&mut *sampler, self.config.iterations_per_round, &self.config.train)?;
            summary.total_iterations += stats.len();

            let checkpointed = self.config.checkpoint_every > 0 && (round + 1) % self.config.checkpoint_every == 0;
            if checkpointed {
                agent.save(&self.config.checkpoint_name, &self.config.checkpoint_dir)?;
            }

            let (mean_critic_loss, mean_actor_loss) = mean_losses(&stats);
            info!(round, mean_critic_loss, mean_actor_loss, checkpointed, "round complete");
            let round_summary = RoundSummary {
                round,
                mean_critic_loss,
                mean_actor_loss,
                checkpointed,
            };
            hook(&round_summary, &mut *sampler)?;
            summary.rounds.push(round_summary);
        }
        Ok(summary)
    }
}

fn mean_losses(stats: &[TrainStats]) -> (f32, f32) {
    if stats.is_empty() {
        return (0.0, 0.0);
    }
    let n = stats.len() as f32;
    let critic = stats.iter().map(|s| s.critic_loss).sum::<f32>() / n;
    let actor = stats.iter().map(|s| s.actor_loss).sum::<f32>() / n;
    (critic, actor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_losses() {
        let stats = [
            TrainStats {
                iteration: 0,
                critic_loss: 1.0,
                actor_loss: -2.0,
            },
            TrainStats {
                iteration: 1,
                critic_loss: 3.0,
                actor_loss: -4.0,
            },
        ];
        assert_eq!(mean_losses(&stats), (2.0, -3.0));
        assert_eq!(mean_losses(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_rejects_empty_rounds() {
        let config = TrainingLoopConfig {
            iterations_per_round: 0,
            ..TrainingLoopConfig::default()
        };
        assert!(TrainingLoop::new(config).is_err());
    }
}
