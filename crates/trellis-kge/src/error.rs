use thiserror::Error;

/// Errors that can occur in trellis-kge.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Invalid training or model configuration.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Worker-group coordination failure: rendezvous, collective call,
    /// worker panic or resource exhaustion. Fatal for the whole launch.
    #[error("Coordination error: {0}")]
    Coordination(String),
    /// A query references an unknown id, or the completion index is unusable.
    /// Aborts the current evaluation set only.
    #[error("Evaluation data error: {0}")]
    EvaluationData(String),
}

/// Result type alias for trellis-kge.
pub type Result<T> = std::result::Result<T, Error>;
