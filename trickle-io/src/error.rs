//! Pipe error types.

use trickle_flow::FlowError;

/// Errors from moving bytes between tokio I/O and a throttle.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// Reading from the source or writing to the sink failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The throttle rejected the operation.
    #[error(transparent)]
    Flow(#[from] FlowError),

    /// The throttle was destroyed before it signalled end of stream.
    #[error("throttle destroyed after {bytes_written} bytes")]
    Aborted {
        /// Bytes written to the sink before the throttle was destroyed.
        bytes_written: u64,
    },
}

/// Result type for pipe operations.
pub type PipeResult<T> = Result<T, PipeError>;
