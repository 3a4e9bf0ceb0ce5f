//! Mesh link traits
//!
//! The fabric talks to the backplane through these three seams and nothing
//! else. A connector produces one link per realm; the link's sender and
//! stream live for the realm's lifetime.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::MeshResult;
use crate::tags::Tag;

/// What a realm needs to establish its mesh link
#[derive(Debug, Clone)]
pub struct MeshOptions {
    /// Identity the link publishes under
    pub sender_name: String,
    /// Identity the link's inbound half is known as
    pub receiver_name: String,
    /// Credential the backplane requires from this node
    pub credential: String,
    /// Tags the inbound stream should observe
    pub observe: Vec<Tag>,
}

/// Outbound half of a mesh link
#[async_trait]
pub trait MeshSender: Send + Sync {
    /// Publish one frame under a tag.
    ///
    /// May wait on the link's outbound buffer; callers must not hold any
    /// realm-wide guard across this call.
    async fn publish(&self, tag: Tag, frame: Bytes) -> MeshResult<()>;
}

/// Inbound half of a mesh link
#[async_trait]
pub trait MeshStream: Send {
    /// Next observed frame, or `None` when the link is gone
    async fn recv(&mut self) -> Option<(Tag, Bytes)>;
}

/// A connected mesh link
pub struct MeshLink {
    /// Handle for publishing; cheap to clone and share
    pub sender: Arc<dyn MeshSender>,
    /// Stream of observed frames; owned by the realm's ingress task
    pub stream: Box<dyn MeshStream>,
}

/// Factory for mesh links
#[async_trait]
pub trait MeshConnector: Send + Sync {
    /// Establish a link. Failures surface to the caller; a realm whose
    /// link cannot be established is never created.
    async fn connect(&self, opts: MeshOptions) -> MeshResult<MeshLink>;
}

impl MeshOptions {
    /// Options observing the standard tag set
    pub fn new(
        sender_name: impl Into<String>,
        receiver_name: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            sender_name: sender_name.into(),
            receiver_name: receiver_name.into(),
            credential: credential.into(),
            observe: crate::tags::observed_tags(),
        }
    }
}
