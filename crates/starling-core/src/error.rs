//! Error types for starling-core

use thiserror::Error;

/// Errors from encoding or decoding signalling frames
#[derive(Debug, Error)]
pub enum SignallingError {
    #[error("Failed to encode signalling: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode signalling: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Errors from writing to a client connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,

    #[error("Write failed: {0}")]
    WriteFailed(String),
}

/// Result type alias for signalling codec operations
pub type SignallingResult<T> = Result<T, SignallingError>;
