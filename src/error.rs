// ============================================================================
// ERRORS — the failure taxonomy shared by loaders, sessions and the renderer
// ============================================================================

use thiserror::Error;

/// Coarse classification of a [`DragError`], reported alongside the error
/// text in a render result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    ModelLoad,
    ArchitectureInference,
    Numerical,
    RuntimeComputation,
    Io,
    Serialize,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::ModelLoad => "ModelLoadError",
            ErrorKind::ArchitectureInference => "ArchitectureInferenceError",
            ErrorKind::Numerical => "NumericalError",
            ErrorKind::RuntimeComputation => "RuntimeComputationError",
            ErrorKind::Io => "IoError",
            ErrorKind::Serialize => "SerializeError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum DragError {
    /// Identifier could not be resolved or the weight payload is unusable.
    #[error("ModelLoadError: {0}")]
    ModelLoad(String),
    /// Identifier does not name a known network family.
    #[error("ArchitectureInferenceError: {0}")]
    ArchitectureInference(String),
    #[error("NumericalError: {0}")]
    Numerical(String),
    /// Any failure inside a forward/backward pass (shape mismatch, bad index).
    #[error("RuntimeComputationError: {0}")]
    RuntimeComputation(String),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("SerializeError: {0}")]
    Serialize(String),
}

impl DragError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DragError::ModelLoad(_) => ErrorKind::ModelLoad,
            DragError::ArchitectureInference(_) => ErrorKind::ArchitectureInference,
            DragError::Numerical(_) => ErrorKind::Numerical,
            DragError::RuntimeComputation(_) => ErrorKind::RuntimeComputation,
            DragError::Io(_) => ErrorKind::Io,
            DragError::Serialize(_) => ErrorKind::Serialize,
        }
    }

    /// Shorthand used throughout the numeric code.
    pub fn runtime(msg: impl Into<String>) -> Self {
        DragError::RuntimeComputation(msg.into())
    }

    /// Prefix the message with the stage that produced it, keeping the kind.
    pub fn context(self, stage: &str) -> Self {
        match self {
            DragError::ModelLoad(m) => DragError::ModelLoad(format!("{stage}: {m}")),
            DragError::ArchitectureInference(m) => {
                DragError::ArchitectureInference(format!("{stage}: {m}"))
            }
            DragError::Numerical(m) => DragError::Numerical(format!("{stage}: {m}")),
            DragError::RuntimeComputation(m) => {
                DragError::RuntimeComputation(format!("{stage}: {m}"))
            }
            DragError::Io(e) => DragError::Io(std::io::Error::new(e.kind(), format!("{stage}: {e}"))),
            DragError::Serialize(m) => DragError::Serialize(format!("{stage}: {m}")),
        }
    }
}

impl From<Box<bincode::ErrorKind>> for DragError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        DragError::Serialize(e.to_string())
    }
}

impl From<ndarray::ShapeError> for DragError {
    fn from(e: ndarray::ShapeError) -> Self {
        DragError::RuntimeComputation(format!("shape error: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, DragError>;
