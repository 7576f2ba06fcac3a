use crate::shape::Shape;

/// All errors that can occur within Burrow.
///
/// A single error type is shared across the workspace so that store
/// operations, tensor-handle operations, and persistence all propagate
/// through one `Result` alias.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shape mismatch between two tensors (e.g., copying [2,3] into [4]).
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Element count mismatch when creating from a slice or copying in place.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Gradient tracking was requested on a tensor whose dtype cannot
    /// carry gradients.
    #[error("cannot track gradients for dtype {dtype}")]
    GradUnsupported { dtype: crate::DType },

    /// No variable registered under the given name.
    #[error("no variable named {name:?} in the store")]
    NotFound { name: String },

    /// A path segment or variable name contains the reserved separator.
    #[error("invalid name {name:?}: must not contain {sep:?}")]
    InvalidName { name: String, sep: char },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout Burrow.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
