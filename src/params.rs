//! Named parameter sets, state dicts and target-network synchronization.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{ArrayD, Zip};

use crate::error::{PilotError, Result};
use crate::layers::{NamedTensor, NamedTensorMut};

/// Tensors keyed by dotted name, e.g. `conv1.weight` or `bn2.running_var`.
pub type TensorMap = BTreeMap<String, ArrayD<f32>>;

/// Parameters plus buffers of one network; the checkpoint payload.
pub type StateDict = TensorMap;

/// Per-parameter gradients, keyed like the parameters they belong to.
pub type Gradients = TensorMap;

/// A network whose tensors can be enumerated by name.
///
/// Implementors only list their tensors; everything built on top (state dicts,
/// checkpoint validation, soft updates, optimizer steps) is shared.
pub trait Parameterized {
    /// Learnable tensors in a stable order.
    fn parameters(&self) -> Vec<NamedTensor<'_>>;

    fn parameters_mut(&mut self) -> Vec<NamedTensorMut<'_>>;

    /// Non-learnable state such as batch-norm running statistics.
    fn buffers(&self) -> Vec<NamedTensor<'_>> {
        Vec::new()
    }

    fn buffers_mut(&mut self) -> Vec<NamedTensorMut<'_>> {
        Vec::new()
    }

    /// Owned copy of the learnable tensors only.
    fn parameter_dict(&self) -> TensorMap {
        self.parameters()
            .into_iter()
            .map(|(name, view)| (name, view.to_owned()))
            .collect()
    }

    fn state_dict(&self) -> StateDict {
        self.parameters()
            .into_iter()
            .chain(self.buffers())
            .map(|(name, view)| (name, view.to_owned()))
            .collect()
    }

    /// Checks that `state` names exactly this network's tensors with matching shapes.
    fn check_state_dict(&self, state: &StateDict) -> Result<()> {
        let own = self.parameters().into_iter().chain(self.buffers());
        let mut expected = 0;
        for (name, view) in own {
            expected += 1;
            let incoming = state
                .get(&name)
                .ok_or_else(|| PilotError::MissingParameter(name.clone()))?;
            if incoming.shape() != view.shape() {
                return Err(PilotError::ShapeMismatch {
                    name,
                    expected: view.shape().to_vec(),
                    actual: incoming.shape().to_vec(),
                });
            }
        }

        if state.len() != expected {
            let known: Vec<String> = self
                .parameters()
                .into_iter()
                .chain(self.buffers())
                .map(|(name, _)| name)
                .collect();
            if let Some(extra) = state.keys().find(|key| !known.contains(key)) {
                return Err(PilotError::UnexpectedParameter(extra.clone()));
            }
        }
        Ok(())
    }

    /// Replaces every tensor from `state`. Nothing changes unless the whole dict validates.
    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        self.check_state_dict(state)?;
        for (name, mut view) in self.parameters_mut() {
            if let Some(source) = state.get(&name) {
                view.assign(source);
            }
        }
        for (name, mut view) in self.buffers_mut() {
            if let Some(source) = state.get(&name) {
                view.assign(source);
            }
        }
        Ok(())
    }

    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|(_, view)| view.len()).sum()
    }
}

/// Moves every parameter of `target` toward `live`: `t ← tau·l + (1 − tau)·t`.
///
/// Buffers are left alone. `tau = 1` copies the live parameters outright.
pub fn soft_update<T: Parameterized>(target: &mut T, live: &T, tau: f32) -> Result<()> {
    if !(tau > 0.0 && tau <= 1.0) {
        return Err(PilotError::invalid_parameter(
            "tau".to_string(),
            format!("must lie in (0, 1], got {}", tau),
        ));
    }

    let live_params: BTreeMap<String, _> = live.parameters().into_iter().collect();
    let mut target_params = target.parameters_mut();
    if target_params.len() != live_params.len() {
        return Err(PilotError::dimension_mismatch(
            format!("{} parameter tensors", live_params.len()),
            format!("{} parameter tensors", target_params.len()),
        ));
    }
    for (name, view) in target_params.iter() {
        match live_params.get(name) {
            Some(source) if source.shape() == view.shape() => {}
            Some(source) => {
                return Err(PilotError::ShapeMismatch {
                    name: name.clone(),
                    expected: view.shape().to_vec(),
                    actual: source.shape().to_vec(),
                })
            }
            None => return Err(PilotError::MissingParameter(name.clone())),
        }
    }

    for (name, view) in target_params.iter_mut() {
        if let Some(source) = live_params.get(name.as_str()) {
            Zip::from(view).and(source).for_each(|t, &l| {
                *t = tau * l + (1.0 - tau) * *t;
            });
        }
    }
    Ok(())
}

pub fn write_state_dict<P: AsRef<Path>>(path: P, state: &StateDict) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, state)?;
    Ok(())
}

pub fn read_state_dict<P: AsRef<Path>>(path: P) -> Result<StateDict> {
    let reader = BufReader::new(File::open(path)?);
    Ok(bincode::deserialize_from(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1, Array2};

    #[derive(Clone)]
    struct Toy {
        weight: Array2<f32>,
        bias: Array1<f32>,
        stat: Array1<f32>,
    }

    impl Toy {
        fn filled(v: f32) -> Self {
            Toy {
                weight: Array2::from_elem((2, 3), v),
                bias: Array1::from_elem(3, v),
                stat: Array1::from_elem(3, v),
            }
        }
    }

    impl Parameterized for Toy {
        fn parameters(&self) -> Vec<NamedTensor<'_>> {
            vec![
                ("fc.weight".to_string(), self.weight.view().into_dyn()),
                ("fc.bias".to_string(), self.bias.view().into_dyn()),
            ]
        }

        fn parameters_mut(&mut self) -> Vec<NamedTensorMut<'_>> {
            vec![
                ("fc.weight".to_string(), self.weight.view_mut().into_dyn()),
                ("fc.bias".to_string(), self.bias.view_mut().into_dyn()),
            ]
        }

        fn buffers(&self) -> Vec<NamedTensor<'_>> {
            vec![("norm.running_mean".to_string(), self.stat.view().into_dyn())]
        }

        fn buffers_mut(&mut self) -> Vec<NamedTensorMut<'_>> {
            vec![("norm.running_mean".to_string(), self.stat.view_mut().into_dyn())]
        }
    }

    #[test]
    fn test_soft_update_is_convex_combination() {
        let live = Toy::filled(1.0);
        let mut target = Toy::filled(0.0);
        soft_update(&mut target, &live, 0.25).unwrap();
        assert!(target.weight.iter().all(|&v| (v - 0.25).abs() < 1e-7));

        soft_update(&mut target, &live, 0.25).unwrap();
        let expected = 0.25 + 0.75 * 0.25;
        assert!(target.bias.iter().all(|&v| (v - expected).abs() < 1e-7));
        // Buffers are never interpolated.
        assert_eq!(target.stat, Array1::<f32>::zeros(3));
    }

    #[test]
    fn test_soft_update_full_tau_copies() {
        let live = Toy::filled(3.5);
        let mut target = Toy::filled(-1.0);
        soft_update(&mut target, &live, 1.0).unwrap();
        assert_eq!(target.parameter_dict(), live.parameter_dict());
    }

    #[test]
    fn test_soft_update_rejects_bad_tau() {
        let live = Toy::filled(1.0);
        let mut target = Toy::filled(0.0);
        for tau in [0.0, -0.1, 1.5, f32::NAN] {
            assert!(soft_update(&mut target, &live, tau).is_err());
        }
        assert_eq!(target.weight, Array2::<f32>::zeros((2, 3)));
    }

    #[test]
    fn test_state_dict_includes_buffers() {
        let toy = Toy::filled(2.0);
        let state = toy.state_dict();
        let keys: Vec<_> = state.keys().cloned().collect();
        assert_eq!(keys, vec!["fc.bias", "fc.weight", "norm.running_mean"]);
        assert_eq!(toy.num_parameters(), 9);
    }

    #[test]
    fn test_load_rejects_missing_unexpected_and_misshaped() {
        let mut toy = Toy::filled(0.0);
        let good = Toy::filled(4.0).state_dict();

        let mut missing = good.clone();
        missing.remove("fc.bias");
        assert!(matches!(
            toy.load_state_dict(&missing),
            Err(PilotError::MissingParameter(name)) if name == "fc.bias"
        ));

        let mut extra = good.clone();
        extra.insert("fc.extra".to_string(), array![1.0f32].into_dyn());
        assert!(matches!(
            toy.load_state_dict(&extra),
            Err(PilotError::UnexpectedParameter(name)) if name == "fc.extra"
        ));

        let mut misshaped = good.clone();
        misshaped.insert("fc.weight".to_string(), Array2::<f32>::zeros((3, 2)).into_dyn());
        assert!(matches!(
            toy.load_state_dict(&misshaped),
            Err(PilotError::ShapeMismatch { .. })
        ));

        assert_eq!(toy.state_dict(), Toy::filled(0.0).state_dict());
        toy.load_state_dict(&good).unwrap();
        assert_eq!(toy.state_dict(), good);
    }

    #[test]
    fn test_state_dict_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toy_actor");
        let state = Toy::filled(0.5).state_dict();
        write_state_dict(&path, &state).unwrap();
        assert_eq!(read_state_dict(&path).unwrap(), state);
    }
}
