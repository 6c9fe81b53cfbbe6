use thiserror::Error;

/// Errors raised synchronously when an operation cannot be started.
///
/// Failures that happen later, while the operation is in flight, close the
/// connection with a [`ClosedReason`](super::ClosedReason) instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    #[error("already waiting for an asynchronous receive")]
    AlreadyReceiving,

    #[error("already waiting to send data")]
    AlreadySending,

    #[error("socket is not connected")]
    NotConnected,

    #[error("invalid size {size}")]
    InvalidSize { size: usize },

    #[error("not enough memory to receive {size} bytes")]
    OutOfMemory { size: usize },
}

impl SocketError {
    pub fn invalid_size(size: usize) -> Self {
        Self::InvalidSize { size }
    }

    pub fn out_of_memory(size: usize) -> Self {
        Self::OutOfMemory { size }
    }
}
