//! Error types for starling-mesh

use thiserror::Error;

/// Errors from the mesh backplane
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Failed to connect to mesh: {0}")]
    ConnectFailed(String),

    #[error("Mesh broker rejected the link: {0}")]
    Rejected(String),

    #[error("Failed to publish to mesh: {0}")]
    PublishFailed(String),

    #[error("Mesh link closed")]
    Closed,

    #[error("Mesh I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode mesh frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode mesh frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Result type alias for mesh operations
pub type MeshResult<T> = Result<T, MeshError>;
