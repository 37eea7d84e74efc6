//! Wire-level error type for the peer envelope codec.

#[derive(Debug, Clone, thiserror::Error)]
pub enum WireError {
    /// `bincode` failed to encode or decode an envelope.
    #[error("wire codec error: {0}")]
    Codec(String),

    /// A batched response carried a different number of return codes than
    /// the request had sub-requests.
    #[error("batched response length {got} does not match request length {expected}")]
    BatchLengthMismatch { expected: usize, got: usize },

    /// An envelope claimed an `inner_type` the receiver doesn't recognize.
    #[error("unrecognized inner message type: {0}")]
    UnknownInnerType(u16),
}

impl WireError {
    pub fn codec(err: impl std::fmt::Display) -> Self {
        WireError::Codec(err.to_string())
    }
}
