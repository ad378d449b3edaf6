//! The DDPG agent: live and target networks, their optimizers and the
//! critic → actor → target update cycle.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayView1, ArrayViewD, Axis, Ix4};
use tracing::{debug, info, info_span, warn};

use crate::config::{ActorVariant, DdpgConfig, TrainParams};
use crate::control::HeadingController;
use crate::error::{PilotError, Result};
use crate::loss::{negative_mean, Loss, MSE};
use crate::networks::{ActionValueCritic, ActorMode, ActorNetwork, PerceptionActor};
use crate::optimizer::OptimizerWrapper;
use crate::params::{read_state_dict, soft_update, write_state_dict, Parameterized};
use crate::replay_buffer::{Observations, TransitionBatch, TransitionSampler};

/// Losses of one training iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainStats {
    pub iteration: usize,
    pub critic_loss: f32,
    pub actor_loss: f32,
}

/// Deep Deterministic Policy Gradient agent with a hybrid actor.
///
/// The targets start as exact copies of the live networks and afterwards only
/// move through [`update_targets`](Self::update_targets).
pub struct DdpgAgent {
    pub actor: ActorNetwork,
    pub actor_target: ActorNetwork,
    pub critic: ActionValueCritic,
    pub critic_target: ActionValueCritic,
    actor_optimizer: OptimizerWrapper,
    critic_optimizer: OptimizerWrapper,
    pub controller: HeadingController,
    config: DdpgConfig,
    flat: bool,
    train_steps: usize,
}

impl DdpgAgent {
    pub fn new(config: DdpgConfig) -> Result<Self> {
        config.validate()?;

        let actor = match config.actor_variant {
            ActorVariant::VisualPolicy => ActorNetwork::Perception(PerceptionActor::new(
                config.image_hw(),
                config.conv_channels,
                config.dropout,
                config.max_action,
            )?),
            ActorVariant::ControlOnly => ActorNetwork::Control,
        };

        let mut critic = ActionValueCritic::new(
            config.critic_architecture,
            &config.state_dim,
            config.action_dim,
            config.conv_channels,
        )?;
        if let Some(path) = &config.critic_checkpoint {
            critic.load_state_dict(&read_state_dict(path)?)?;
            info!(path = %path.display(), "loaded critic checkpoint");
        }

        let flat = !actor.needs_images() && !critic.needs_images();
        info!(
            actor = %config.actor_variant,
            critic = ?config.critic_architecture,
            actor_parameters = actor.num_parameters(),
            critic_parameters = critic.num_parameters(),
            "constructed DDPG agent"
        );

        Ok(DdpgAgent {
            actor_target: actor.clone(),
            critic_target: critic.clone(),
            actor,
            critic,
            actor_optimizer: OptimizerWrapper::from_kind(config.optimizer),
            critic_optimizer: OptimizerWrapper::from_kind(config.optimizer),
            controller: config.heading,
            flat,
            train_steps: 0,
            config,
        })
    }

    pub fn config(&self) -> &DdpgConfig {
        &self.config
    }

    /// Whether this agent samples flattened observations.
    pub fn flat_states(&self) -> bool {
        self.flat
    }

    /// Training iterations completed over the agent's lifetime.
    pub fn train_steps(&self) -> usize {
        self.train_steps
    }

    /// Action `[throttle, steering]` for one `[3, h, w]` observation.
    ///
    /// Runs in inference mode and leaves the agent untouched.
    pub fn predict(
        &self,
        state: ArrayViewD<f32>,
        lateral_distance: f32,
        heading_angle: f32,
        mode: ActorMode,
    ) -> Result<Array1<f32>> {
        if state.ndim() == 0 || state.shape()[0] != 3 {
            return Err(rejected(PilotError::InvalidObservation(format!(
                "expected a channel-first [3, h, w] image, got shape {:?}",
                state.shape()
            ))));
        }
        if state.shape() != self.config.state_dim.as_slice() {
            return Err(rejected(PilotError::dimension_mismatch(
                format!("{:?}", self.config.state_dim),
                format!("{:?}", state.shape()),
            )));
        }

        let image = state
            .insert_axis(Axis(0))
            .into_dimensionality::<Ix4>()?
            .to_owned();
        let action = self.actor.infer(
            &Observations::Image(image),
            Array1::from_elem(1, lateral_distance).view(),
            Array1::from_elem(1, heading_angle).view(),
            &self.controller,
            mode,
        )?;
        Ok(action.row(0).to_owned())
    }

    /// Batched inference with per-sample distances and angles.
    pub fn act_batch(
        &self,
        states: &Observations,
        lateral_distance: ArrayView1<f32>,
        heading_angle: ArrayView1<f32>,
        mode: ActorMode,
    ) -> Result<Array2<f32>> {
        let n = states.batch_size();
        if lateral_distance.len() != n || heading_angle.len() != n {
            return Err(rejected(PilotError::dimension_mismatch(
                format!("{} distances and angles", n),
                format!("{} and {}", lateral_distance.len(), heading_angle.len()),
            )));
        }
        self.actor
            .infer(states, lateral_distance, heading_angle, &self.controller, mode)
    }

    /// Runs `iterations` sequential critic → actor → target updates.
    pub fn train<S>(&mut self, sampler: &mut S, iterations: usize, params: &TrainParams) -> Result<Vec<TrainStats>>
    where
        S: TransitionSampler + ?Sized,
    {
        params.validate()?;
        let span = info_span!("ddpg_train", iterations, batch_size = params.batch_size);
        let _guard = span.enter();

        let mut stats = Vec::with_capacity(iterations);
        for iteration in 0..iterations {
            let batch = sampler.sample(params.batch_size, self.flat)?;
            batch.validate(params.batch_size).map_err(rejected)?;

            let critic_loss = self.update_critic(&batch, params.discount)?;
            let actor_loss = self.update_actor(&batch)?;
            self.update_targets(params.tau)?;
            self.train_steps += 1;

            debug!(iteration, critic_loss, actor_loss, "training iteration");
            stats.push(TrainStats {
                iteration,
                critic_loss,
                actor_loss,
            });
        }

        if let Some(last) = stats.last() {
            info!(
                iterations,
                critic_loss = last.critic_loss,
                actor_loss = last.actor_loss,
                total_steps = self.train_steps,
                "training finished"
            );
        }
        Ok(stats)
    }

    /// One critic step toward `r + discount · (1 − done) · Q'(s', μ'(s'))`.
    pub fn update_critic(&mut self, batch: &TransitionBatch, discount: f32) -> Result<f32> {
        batch.validate(batch.len()).map_err(rejected)?;
        let next_action = self.actor_target.forward(
            &batch.next_state,
            batch.next_dist.view(),
            batch.next_angle.view(),
            &self.controller,
            ActorMode::Perception,
        )?;
        let next_value = self.critic_target.forward(&batch.next_state, next_action.view())?;
        let not_done = batch.done.mapv(|d| 1.0 - d);
        let target = (&batch.reward + &(not_done * discount * &next_value.column(0))).insert_axis(Axis(1));

        let value = self.critic.forward(&batch.state, batch.action.view())?;
        let loss = MSE.compute_batch(value.view(), target.view());
        let grad = MSE.gradient_batch(value.view(), target.view());

        let grads = self.critic.backward(grad.view());
        self.critic_optimizer
            .step(self.critic.parameters_mut(), &grads, self.config.critic_lr)?;
        Ok(loss)
    }

    /// One actor step along ∂Q/∂action. Critic parameters are read, never written.
    pub fn update_actor(&mut self, batch: &TransitionBatch) -> Result<f32> {
        batch.validate(batch.len()).map_err(rejected)?;
        let action = self.actor.forward(
            &batch.state,
            batch.dist.view(),
            batch.angle.view(),
            &self.controller,
            ActorMode::Perception,
        )?;
        let value = self.critic.forward(&batch.state, action.view())?;
        let (loss, grad_value) = negative_mean(value.view());

        let grad_action = self.critic.backward_action(grad_value.view());
        let grads = self.actor.backward(grad_action.view());
        self.actor_optimizer
            .step(self.actor.parameters_mut(), &grads, self.config.actor_lr)?;
        Ok(loss)
    }

    /// Soft-updates both targets toward their live networks.
    pub fn update_targets(&mut self, tau: f32) -> Result<()> {
        soft_update(&mut self.critic_target, &self.critic, tau)?;
        soft_update(&mut self.actor_target, &self.actor, tau)
    }

    /// `{directory}/{name}_actor` and `{directory}/{name}_critic`.
    pub fn checkpoint_paths<P: AsRef<Path>>(name: &str, directory: P) -> (PathBuf, PathBuf) {
        let directory = directory.as_ref();
        (
            directory.join(format!("{}_actor", name)),
            directory.join(format!("{}_critic", name)),
        )
    }

    /// Writes the live actor and critic state dicts.
    pub fn save<P: AsRef<Path>>(&self, name: &str, directory: P) -> Result<()> {
        fs::create_dir_all(directory.as_ref())?;
        let (actor_path, critic_path) = Self::checkpoint_paths(name, directory);
        write_state_dict(&actor_path, &self.actor.state_dict())?;
        write_state_dict(&critic_path, &self.critic.state_dict())?;
        info!(actor = %actor_path.display(), critic = %critic_path.display(), "saved checkpoint");
        Ok(())
    }

    /// Restores the live actor and critic. Either both load or neither changes.
    pub fn load<P: AsRef<Path>>(&mut self, name: &str, directory: P) -> Result<()> {
        let (actor_path, critic_path) = Self::checkpoint_paths(name, directory);
        let actor_state = read_state_dict(&actor_path)?;
        let critic_state = read_state_dict(&critic_path)?;
        self.actor.check_state_dict(&actor_state).map_err(rejected)?;
        self.critic.check_state_dict(&critic_state).map_err(rejected)?;

        self.actor.load_state_dict(&actor_state)?;
        self.critic.load_state_dict(&critic_state)?;
        info!(actor = %actor_path.display(), critic = %critic_path.display(), "loaded checkpoint");
        Ok(())
    }
}

fn rejected(err: PilotError) -> PilotError {
    warn!(error = %err, "precondition failed");
    err
}
