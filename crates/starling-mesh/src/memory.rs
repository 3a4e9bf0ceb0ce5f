//! In-process mesh
//!
//! A broker that lives inside the process: every link's publishes fan out
//! to every other link observing the tag. Used by tests and by
//! single-process deployments that still want the full local↔mesh wiring.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::MeshResult;
use crate::tags::Tag;
use crate::transport::{MeshConnector, MeshLink, MeshOptions, MeshSender, MeshStream};

struct Endpoint {
    observe: Vec<Tag>,
    inbox: mpsc::UnboundedSender<(Tag, Bytes)>,
}

struct Inner {
    links: DashMap<u64, Endpoint>,
    next_id: AtomicU64,
}

/// In-process mesh broker; clone handles share the same mesh
#[derive(Clone)]
pub struct MemoryMesh {
    inner: Arc<Inner>,
}

impl MemoryMesh {
    /// Create an empty in-process mesh
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                links: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Number of links currently registered
    pub fn link_count(&self) -> usize {
        self.inner.links.len()
    }
}

impl Default for MemoryMesh {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MeshConnector for MemoryMesh {
    async fn connect(&self, opts: MeshOptions) -> MeshResult<MeshLink> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (inbox, rx) = mpsc::unbounded_channel();
        self.inner.links.insert(
            id,
            Endpoint {
                observe: opts.observe,
                inbox,
            },
        );
        tracing::debug!(link = id, sender = %opts.sender_name, "memory mesh link established");

        Ok(MeshLink {
            sender: Arc::new(MemorySender {
                origin: id,
                inner: self.inner.clone(),
            }),
            stream: Box::new(MemoryStream { rx }),
        })
    }
}

struct MemorySender {
    origin: u64,
    inner: Arc<Inner>,
}

#[async_trait]
impl MeshSender for MemorySender {
    async fn publish(&self, tag: Tag, frame: Bytes) -> MeshResult<()> {
        for entry in self.inner.links.iter() {
            // Never echo a frame back to the link that published it.
            if *entry.key() == self.origin || !entry.value().observe.contains(&tag) {
                continue;
            }
            let _ = entry.value().inbox.send((tag, frame.clone()));
        }
        Ok(())
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<(Tag, Bytes)>,
}

#[async_trait]
impl MeshStream for MemoryStream {
    async fn recv(&mut self) -> Option<(Tag, Bytes)> {
        self.rx.recv().await
    }
}
