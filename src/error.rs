use thiserror::Error;
use validator::ValidationErrors;

/// Errors surfaced by the publish path.
///
/// Cloneable so every caller coalesced into one debounce window can receive
/// the same terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    /// The snapshot failed structural validation; never retried.
    #[error("invalid snapshot: {0}")]
    Validation(String),
    /// No channel transport has been installed; never retried.
    #[error("channel transport is not initialized")]
    TransportUnavailable,
    /// The wire payload could not be serialized.
    #[error("failed to encode event payload: {0}")]
    Encode(String),
    /// The transport kept failing until the retry budget ran out. The durable
    /// store write that preceded the publish stands regardless.
    #[error("broadcast failed after {attempts} attempts: {message}")]
    EmitFailed {
        /// How many emission attempts were made.
        attempts: u32,
        /// Last transport error message.
        message: String,
    },
}

impl From<ValidationErrors> for BroadcastError {
    fn from(err: ValidationErrors) -> Self {
        BroadcastError::Validation(format!("validation failed: {err}"))
    }
}

/// Errors raised while loading or validating the startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Environment variable name.
        key: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// A parsed value violated a range or ordering invariant.
    #[error("configuration out of range: {0}")]
    OutOfRange(String),
}
