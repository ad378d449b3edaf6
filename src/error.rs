use std::fmt;

/// Result type for lanepilot operations
pub type Result<T> = std::result::Result<T, PilotError>;

/// Main error type for the training core
#[derive(Debug, Clone, PartialEq)]
pub enum PilotError {
    /// Tensor dimensions disagree with what an operation expects
    DimensionMismatch {
        expected: String,
        actual: String,
    },

    /// Observation violates the channel-first `[3, H, W]` contract
    InvalidObservation(String),

    /// Invalid configuration or argument value
    InvalidParameter {
        name: String,
        reason: String,
    },

    /// A checkpoint lacks a tensor the network owns
    MissingParameter(String),

    /// A checkpoint carries a tensor the network does not own
    UnexpectedParameter(String),

    /// A checkpoint tensor has the wrong shape
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Sampler could not produce a full batch
    EmptyBuffer(String),

    /// IO errors (file operations)
    IoError(String),

    /// Serialization/deserialization errors
    SerializationError(String),
}

impl fmt::Display for PilotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PilotError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, actual)
            }
            PilotError::InvalidObservation(msg) => write!(f, "Invalid observation: {}", msg),
            PilotError::InvalidParameter { name, reason } => {
                write!(f, "Invalid parameter '{}': {}", name, reason)
            }
            PilotError::MissingParameter(name) => {
                write!(f, "Checkpoint is missing parameter '{}'", name)
            }
            PilotError::UnexpectedParameter(name) => {
                write!(f, "Checkpoint has unexpected parameter '{}'", name)
            }
            PilotError::ShapeMismatch { name, expected, actual } => write!(
                f,
                "Shape mismatch for '{}': expected {:?}, got {:?}",
                name, expected, actual
            ),
            PilotError::EmptyBuffer(msg) => write!(f, "Empty buffer: {}", msg),
            PilotError::IoError(msg) => write!(f, "IO error: {}", msg),
            PilotError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for PilotError {}

impl From<std::io::Error> for PilotError {
    fn from(err: std::io::Error) -> Self {
        PilotError::IoError(err.to_string())
    }
}

impl From<bincode::Error> for PilotError {
    fn from(err: bincode::Error) -> Self {
        PilotError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for PilotError {
    fn from(err: serde_json::Error) -> Self {
        PilotError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for PilotError {
    fn from(err: ndarray::ShapeError) -> Self {
        PilotError::DimensionMismatch {
            expected: "a compatible shape".to_string(),
            actual: err.to_string(),
        }
    }
}

impl PilotError {
    pub fn dimension_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        PilotError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        PilotError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = PilotError::dimension_mismatch("[64, 2]", "[32, 2]");
        assert_eq!(err.to_string(), "Dimension mismatch: expected [64, 2], got [32, 2]");

        let err = PilotError::ShapeMismatch {
            name: "lin1.weight".to_string(),
            expected: vec![128, 512],
            actual: vec![4032, 512],
        };
        assert!(err.to_string().contains("lin1.weight"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PilotError = io.into();
        assert!(matches!(err, PilotError::IoError(_)));
    }
}
