use thiserror::Error;

/// Errors raised at the configuration edge.
///
/// The dispatch path itself never fails: handler outcomes are not observed.
#[derive(Debug, Error)]
pub enum WeftError {
    #[error("invalid concurrency directive: {value:?} (expected an integer)")]
    InvalidConcurrency { value: String },

    #[error("invalid dispatch config: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}
