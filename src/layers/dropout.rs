use ndarray::{Array2, ArrayView2};
use ndarray_rand::RandomExt;
use rand_distr::Uniform;
use serde::{Deserialize, Serialize};

/// Inverted dropout: during training each unit is zeroed with probability
/// `rate` and survivors are scaled by `1 / (1 - rate)`, so inference is the
/// identity.
#[derive(Serialize, Deserialize, Clone)]
pub struct DropoutLayer {
    /// Probability of dropping a unit
    pub rate: f32,

    #[serde(skip)]
    mask: Option<Array2<f32>>,
}

impl DropoutLayer {
    pub fn new(rate: f32) -> Self {
        assert!((0.0..1.0).contains(&rate), "Dropout rate must be in [0, 1)");
        DropoutLayer { rate, mask: None }
    }

    pub fn forward(&mut self, inputs: ArrayView2<f32>) -> Array2<f32> {
        if self.rate == 0.0 {
            self.mask = None;
            return inputs.to_owned();
        }

        let scale = 1.0 / (1.0 - self.rate);
        let rate = self.rate;
        let mask = Array2::random(inputs.raw_dim(), Uniform::new(0.0f32, 1.0))
            .mapv(|u| if u >= rate { scale } else { 0.0 });
        let outputs = &inputs * &mask;
        self.mask = Some(mask);
        outputs
    }

    pub fn infer(&self, inputs: ArrayView2<f32>) -> Array2<f32> {
        inputs.to_owned()
    }

    pub fn backward(&self, grad_output: ArrayView2<f32>) -> Array2<f32> {
        match &self.mask {
            Some(mask) => &grad_output * mask,
            None => grad_output.to_owned(),
        }
    }
}
