//! Core error types for the Strata engine.

/// A specialized Result type for Strata operations.
pub type StrataResult<T> = Result<T, StrataError>;

/// Top-level error type encompassing all Strata subsystems.
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    #[error("initialization error: {0}")]
    Initialization(String),

    #[error("unknown shader: {0}")]
    UnknownShader(String),

    #[error("shader already registered: {0}")]
    DuplicateShader(String),

    #[error("invalid shader '{name}': {reason}")]
    InvalidShader { name: String, reason: String },

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("malformed pass graph: {0}")]
    MalformedGraph(String),

    #[error("task {task} timed out after {elapsed_ms} ms")]
    Timeout { task: String, elapsed_ms: u64 },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("worker lost: {0}")]
    WorkerLost(String),

    #[error("renderer panicked: {0}")]
    RendererPanic(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StrataError {
    /// Create a shader validation error.
    pub fn invalid_shader(name: impl Into<String>, reason: impl Into<String>) -> Self {
        StrataError::InvalidShader {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Failures that may succeed when the same work is attempted again.
    ///
    /// Logic errors (unknown shaders, malformed graphs, bad dimensions) are
    /// deterministic and are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, StrataError::Timeout { .. } | StrataError::WorkerLost(_))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, StrataError::Cancelled(_))
    }

    /// How many times a task that failed with this error may be retried,
    /// given the configured limit for transient failures.
    ///
    /// A renderer panic is usually a bug that will panic again, but can also
    /// be a one-off device loss, so it gets a single retry.
    pub fn retry_budget(&self, max_retries: u32) -> u32 {
        match self {
            _ if self.is_transient() => max_retries,
            StrataError::RendererPanic(_) => max_retries.min(1),
            _ => 0,
        }
    }
}
