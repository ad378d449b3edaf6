//! Gradient-descent optimizers keyed by parameter name.

use std::collections::BTreeMap;

use ndarray::{ArrayD, ArrayViewMutD, Zip};
use serde::{Deserialize, Serialize};

use crate::config::OptimizerKind;
use crate::error::{PilotError, Result};
use crate::layers::NamedTensorMut;
use crate::params::Gradients;

pub trait Optimizer {
    /// Called once per step, before any parameter is updated.
    fn begin_step(&mut self) {}

    fn update(&mut self, name: &str, param: ArrayViewMutD<f32>, grad: &ArrayD<f32>, learning_rate: f32);
}

#[derive(Serialize, Deserialize, Clone)]
pub enum OptimizerWrapper {
    SGD(SGD),
    Adam(Adam),
}

impl OptimizerWrapper {
    pub fn from_kind(kind: OptimizerKind) -> Self {
        match kind {
            OptimizerKind::Adam => OptimizerWrapper::Adam(Adam::default()),
            OptimizerKind::Sgd => OptimizerWrapper::SGD(SGD::new()),
        }
    }

    /// One descent step over `params`.
    ///
    /// Every parameter must have a gradient of its own shape; nothing is
    /// updated otherwise. Gradients for names not in `params` are ignored.
    pub fn step(&mut self, params: Vec<NamedTensorMut<'_>>, grads: &Gradients, learning_rate: f32) -> Result<()> {
        for (name, param) in &params {
            let grad = grads
                .get(name)
                .ok_or_else(|| PilotError::MissingParameter(format!("gradient for {}", name)))?;
            if grad.shape() != param.shape() {
                return Err(PilotError::ShapeMismatch {
                    name: name.clone(),
                    expected: param.shape().to_vec(),
                    actual: grad.shape().to_vec(),
                });
            }
        }

        if params.is_empty() {
            return Ok(());
        }
        self.begin_step();
        for (name, param) in params {
            if let Some(grad) = grads.get(&name) {
                self.update(&name, param, grad, learning_rate);
            }
        }
        Ok(())
    }
}

impl Optimizer for OptimizerWrapper {
    fn begin_step(&mut self) {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.begin_step(),
            OptimizerWrapper::Adam(optimizer) => optimizer.begin_step(),
        }
    }

    fn update(&mut self, name: &str, param: ArrayViewMutD<f32>, grad: &ArrayD<f32>, learning_rate: f32) {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.update(name, param, grad, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.update(name, param, grad, learning_rate),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct SGD;

impl SGD {
    pub fn new() -> SGD {
        SGD
    }
}

impl Default for SGD {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer for SGD {
    fn update(&mut self, _name: &str, mut param: ArrayViewMutD<f32>, grad: &ArrayD<f32>, learning_rate: f32) {
        param.zip_mut_with(grad, |w, &g| *w -= learning_rate * g);
    }
}

/// Adam with bias-corrected moments, one pair per named parameter.
#[derive(Serialize, Deserialize, Clone)]
pub struct Adam {
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// Steps taken so far
    pub t: i32,
    moments: BTreeMap<String, (ArrayD<f32>, ArrayD<f32>)>,
}

impl Adam {
    pub fn new(beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Adam {
            beta1,
            beta2,
            epsilon,
            t: 0,
            moments: BTreeMap::new(),
        }
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.9, 0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn begin_step(&mut self) {
        self.t += 1;
    }

    fn update(&mut self, name: &str, param: ArrayViewMutD<f32>, grad: &ArrayD<f32>, learning_rate: f32) {
        let (m, v) = self
            .moments
            .entry(name.to_string())
            .or_insert_with(|| (ArrayD::zeros(grad.raw_dim()), ArrayD::zeros(grad.raw_dim())));

        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let t = self.t.max(1);
        let bias1 = 1.0 - beta1.powi(t);
        let bias2 = 1.0 - beta2.powi(t);

        Zip::from(param).and(m).and(v).and(grad).for_each(|w, m, v, &g| {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *w -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn test_sgd_step() {
        let mut weights = array![1.0f32, 2.0];
        let mut grads = Gradients::new();
        grads.insert("w".to_string(), array![0.5f32, -1.0].into_dyn());
        let mut optimizer = OptimizerWrapper::SGD(SGD::new());
        optimizer
            .step(vec![("w".to_string(), weights.view_mut().into_dyn())], &grads, 0.1)
            .unwrap();
        assert!((weights[0] - 0.95).abs() < 1e-6);
        assert!((weights[1] - 2.1).abs() < 1e-6);
    }

    #[test]
    fn test_adam_first_step_moves_by_learning_rate() {
        let mut weights = Array1::<f32>::zeros(3);
        let mut grads = Gradients::new();
        grads.insert("w".to_string(), array![2.0f32, -0.5, 10.0].into_dyn());
        let mut optimizer = OptimizerWrapper::Adam(Adam::default());
        optimizer
            .step(vec![("w".to_string(), weights.view_mut().into_dyn())], &grads, 0.01)
            .unwrap();
        // Bias correction makes the first update lr·sign(g).
        for (w, expected) in weights.iter().zip([-0.01, 0.01, -0.01]) {
            assert!((w - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_missing_gradient_changes_nothing() {
        let mut a = array![1.0f32];
        let mut b = array![2.0f32];
        let mut grads = Gradients::new();
        grads.insert("a".to_string(), array![1.0f32].into_dyn());
        let mut optimizer = OptimizerWrapper::from_kind(OptimizerKind::Sgd);
        let result = optimizer.step(
            vec![
                ("a".to_string(), a.view_mut().into_dyn()),
                ("b".to_string(), b.view_mut().into_dyn()),
            ],
            &grads,
            0.5,
        );
        assert!(matches!(result, Err(PilotError::MissingParameter(_))));
        assert_eq!(a, array![1.0]);
        assert_eq!(b, array![2.0]);
    }
}
