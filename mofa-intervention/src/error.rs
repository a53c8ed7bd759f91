//! Error types for the intervention engine

use thiserror::Error;

/// Result alias used across the engine
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the engine to its embedder
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid lesson: {0}")]
    InvalidLesson(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Session task failed: {0}")]
    Task(String),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Errors reported by an output dispatcher
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Speech failed: {0}")]
    Failed(String),

    #[error("Speech output unavailable")]
    Unavailable,
}

/// Reasons an incoming emotion sample is discarded at ingestion
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SampleError {
    #[error("Unknown emotion label: {0}")]
    UnknownLabel(String),

    #[error("Confidence out of range: {0}")]
    ConfidenceOutOfRange(f64),
}
