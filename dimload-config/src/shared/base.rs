use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("`{0}` cannot be empty")]
    EmptyField(&'static str),
    #[error("`{0}` cannot be zero")]
    ZeroValue(&'static str),
    #[error("`retry.backoff_factor` must be at least 1, got {0}")]
    InvalidBackoffFactor(u32),
    #[error("`retry.initial_delay_ms` ({initial}) cannot exceed `retry.max_delay_ms` ({max})")]
    InvalidRetryDelays { initial: u64, max: u64 },
    #[error("priming references unknown dimension `{0}`")]
    UnknownPrimingDimension(String),
    #[error("invalid delimiter `{0}`: must be a single ASCII character")]
    InvalidDelimiter(String),
}
