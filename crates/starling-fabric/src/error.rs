//! Error types for starling-fabric

use thiserror::Error;

use starling_core::{ConnectionError, SignallingError};
use starling_mesh::MeshError;

/// Errors from fabric operations
#[derive(Debug, Error)]
pub enum FabricError {
    /// A peer tried to publish into a channel it has not joined
    #[error("Not a member of channel: {channel}")]
    NotMember { channel: String },

    /// The realm behind a back-reference is gone
    #[error("Realm no longer exists")]
    RealmGone,

    #[error("Signalling error: {0}")]
    Signalling(#[from] SignallingError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),
}

/// Result type alias for fabric operations
pub type FabricResult<T> = Result<T, FabricError>;
