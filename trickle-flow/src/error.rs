//! Flow control error types.
//!
//! The throttle state machine itself never fails; these errors surface only
//! from configuration validation and from callers that need to distinguish
//! an ended stream.

/// Flow control error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// The throttle has been ended or destroyed.
    #[error("throttle has ended")]
    Ended,
}

/// Result type for flow control operations.
pub type FlowResult<T> = Result<T, FlowError>;
