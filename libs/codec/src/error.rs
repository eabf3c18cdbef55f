use thiserror::Error;

/// Errors produced while encoding or decoding command envelopes.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
