use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Queue {0} is closed")]
    QueueClosed(String),

    #[error("Worker for queue {0} is closed")]
    WorkerClosed(String),

    #[error("Sandboxed processor error: {0}")]
    Sandbox(String),

    #[error("Job execution failed: {0}")]
    JobFailed(#[from] JobError),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Job execution outcome reported by a processor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The job may succeed if attempted again
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// The job can never succeed
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl JobError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for QueueError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("task join error: {err}"))
    }
}
