use ndarray::{stack, Array1, Array2, Array4, ArrayD, ArrayView4, ArrayViewD, Axis, CowArray, Ix2, Ix4};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use std::collections::VecDeque;

use crate::error::{PilotError, Result};

/// A batch of observations, batch-first.
#[derive(Clone, Debug, PartialEq)]
pub enum Observations {
    /// `[batch, 3, h, w]` channel-first images
    Image(Array4<f32>),
    /// `[batch, 3·h·w]` flattened images
    Flat(Array2<f32>),
}

impl Observations {
    pub fn batch_size(&self) -> usize {
        match self {
            Observations::Image(images) => images.dim().0,
            Observations::Flat(flat) => flat.nrows(),
        }
    }

    /// The image view, for networks that convolve.
    pub fn image(&self) -> Result<ArrayView4<'_, f32>> {
        match self {
            Observations::Image(images) => Ok(images.view()),
            Observations::Flat(_) => Err(PilotError::InvalidObservation(
                "convolutional networks need [batch, 3, h, w] images, got flat states".to_string(),
            )),
        }
    }

    /// `[batch, features]` view; images are flattened in channel-major order.
    pub fn flattened(&self) -> CowArray<'_, f32, Ix2> {
        match self {
            Observations::Flat(flat) => flat.view().into(),
            Observations::Image(images) => {
                let (n, c, h, w) = images.dim();
                images
                    .as_standard_layout()
                    .into_shape((n, c * h * w))
                    .expect("standard layout always reshapes")
            }
        }
    }
}

/// One stored environment step.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// `[3, h, w]` observation
    pub state: ArrayD<f32>,
    /// `[throttle, steering]`
    pub action: Array1<f32>,
    pub reward: f32,
    pub next_state: ArrayD<f32>,
    pub done: bool,
    /// Lateral distance from the lane centre at `state`
    pub dist: f32,
    /// Heading error at `state`
    pub angle: f32,
    pub next_dist: f32,
    pub next_angle: f32,
}

/// A sampled, batch-aligned snapshot of transitions.
#[derive(Clone, Debug)]
pub struct TransitionBatch {
    pub state: Observations,
    /// `[batch, 2]`
    pub action: Array2<f32>,
    pub reward: Array1<f32>,
    pub next_state: Observations,
    /// 1.0 where the episode ended, else 0.0
    pub done: Array1<f32>,
    pub dist: Array1<f32>,
    pub angle: Array1<f32>,
    pub next_dist: Array1<f32>,
    pub next_angle: Array1<f32>,
}

impl TransitionBatch {
    pub fn len(&self) -> usize {
        self.state.batch_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that every field holds exactly `batch_size` rows.
    pub fn validate(&self, batch_size: usize) -> Result<()> {
        let sizes = [
            ("state", self.state.batch_size()),
            ("action", self.action.nrows()),
            ("reward", self.reward.len()),
            ("next_state", self.next_state.batch_size()),
            ("done", self.done.len()),
            ("dist", self.dist.len()),
            ("angle", self.angle.len()),
            ("next_dist", self.next_dist.len()),
            ("next_angle", self.next_angle.len()),
        ];
        for (field, size) in sizes {
            if size != batch_size {
                return Err(PilotError::dimension_mismatch(
                    format!("batch of {}", batch_size),
                    format!("{} rows in '{}'", size, field),
                ));
            }
        }
        Ok(())
    }
}

/// Anything that can hand the trainer a batch of transitions.
pub trait TransitionSampler {
    /// Draws `batch_size` transitions. `flat` asks for flattened observations.
    fn sample(&mut self, batch_size: usize, flat: bool) -> Result<TransitionBatch>;
}

/// Fixed-capacity FIFO replay memory with its own RNG.
#[derive(Clone)]
pub struct ReplayBuffer {
    buffer: VecDeque<Transition>,
    capacity: usize,
    rng: StdRng,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, StdRng::from_entropy())
    }

    /// Buffer whose sampling order is reproducible.
    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self::with_rng(capacity, StdRng::seed_from_u64(seed))
    }

    fn with_rng(capacity: usize, rng: StdRng) -> Self {
        ReplayBuffer {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            rng,
        }
    }

    /// Stores a transition, evicting the oldest once full.
    pub fn add(&mut self, transition: Transition) -> Result<()> {
        if transition.state.shape() != transition.next_state.shape() {
            return Err(PilotError::dimension_mismatch(
                format!("next_state shaped {:?}", transition.state.shape()),
                format!("{:?}", transition.next_state.shape()),
            ));
        }
        if let Some(first) = self.buffer.front() {
            if first.state.shape() != transition.state.shape() {
                return Err(PilotError::dimension_mismatch(
                    format!("state shaped {:?}", first.state.shape()),
                    format!("{:?}", transition.state.shape()),
                ));
            }
        }
        if transition.action.len() != 2 {
            return Err(PilotError::dimension_mismatch(
                "2 action components".to_string(),
                transition.action.len().to_string(),
            ));
        }

        if self.capacity == 0 {
            return Ok(());
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

fn stack_observations<'a, I>(states: I, flat: bool) -> Result<Observations>
where
    I: Iterator<Item = ArrayViewD<'a, f32>>,
{
    let views: Vec<ArrayViewD<f32>> = states.collect();
    let stacked = stack(Axis(0), &views)?;
    if flat {
        let n = stacked.shape()[0];
        let features = stacked.len() / n.max(1);
        let flat = stacked
            .as_standard_layout()
            .into_owned()
            .into_shape((n, features))?;
        Ok(Observations::Flat(flat))
    } else {
        let images = stacked.into_dimensionality::<Ix4>().map_err(|_| {
            PilotError::InvalidObservation("stored states are not [3, h, w] images".to_string())
        })?;
        Ok(Observations::Image(images))
    }
}

impl TransitionSampler for ReplayBuffer {
    fn sample(&mut self, batch_size: usize, flat: bool) -> Result<TransitionBatch> {
        if self.buffer.len() < batch_size {
            return Err(PilotError::EmptyBuffer(format!(
                "requested {} transitions, buffer holds {}",
                batch_size,
                self.buffer.len()
            )));
        }

        let picked: Vec<&Transition> = index::sample(&mut self.rng, self.buffer.len(), batch_size)
            .into_iter()
            .map(|i| &self.buffer[i])
            .collect();

        let column = |f: fn(&Transition) -> f32| -> Array1<f32> { picked.iter().map(|t| f(t)).collect() };
        let actions: Vec<_> = picked.iter().map(|t| t.action.view()).collect();

        Ok(TransitionBatch {
            state: stack_observations(picked.iter().map(|t| t.state.view()), flat)?,
            action: stack(Axis(0), &actions)?,
            reward: column(|t| t.reward),
            next_state: stack_observations(picked.iter().map(|t| t.next_state.view()), flat)?,
            done: column(|t| if t.done { 1.0 } else { 0.0 }),
            dist: column(|t| t.dist),
            angle: column(|t| t.angle),
            next_dist: column(|t| t.next_dist),
            next_angle: column(|t| t.next_angle),
        })
    }
}
