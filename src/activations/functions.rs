use ndarray::{Array, ArrayBase, Data, DataMut, Dimension};
use serde::{Deserialize, Serialize};

/// Slope PyTorch uses for `nn.LeakyReLU()` when none is given.
pub const DEFAULT_LEAKY_SLOPE: f32 = 0.01;

/// Logistic sigmoid on a single value. Bounds the throttle output.
#[inline]
pub fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// An enumeration of the activation functions a layer can apply after its affine map.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Default)]
pub enum Activation {
    #[default]
    Relu,
    Linear,
    LeakyRelu { alpha: f32 },
}

impl Activation {
    /// LeakyReLU with the default slope.
    pub fn leaky() -> Self {
        Activation::LeakyRelu { alpha: DEFAULT_LEAKY_SLOPE }
    }

    /// Value of the activation at `v`.
    #[inline]
    pub fn scalar(&self, v: f32) -> f32 {
        match self {
            Activation::Relu => v.max(0.0),
            Activation::Linear => v,
            Activation::LeakyRelu { alpha } => {
                if v > 0.0 {
                    v
                } else {
                    alpha * v
                }
            }
        }
    }

    /// Derivative of the activation with respect to its pre-activation input `v`.
    #[inline]
    pub fn scalar_derivative(&self, v: f32) -> f32 {
        match self {
            Activation::Relu => {
                if v > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Linear => 1.0,
            Activation::LeakyRelu { alpha } => {
                if v > 0.0 {
                    1.0
                } else {
                    *alpha
                }
            }
        }
    }

    /// Apply the activation in-place to an array of any dimension.
    pub fn apply<S, D>(&self, input: &mut ArrayBase<S, D>)
    where
        S: DataMut<Elem = f32>,
        D: Dimension,
    {
        if let Activation::Linear = self {
            return;
        }
        let act = *self;
        input.mapv_inplace(|v| act.scalar(v));
    }

    /// Element-wise derivative evaluated at the cached pre-activation values.
    pub fn derivative<S, D>(&self, pre_activation: &ArrayBase<S, D>) -> Array<f32, D>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        let act = *self;
        pre_activation.mapv(|v| act.scalar_derivative(v))
    }
}
