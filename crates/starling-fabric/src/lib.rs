//! # Starling Fabric
//!
//! The in-process signaling fabric: the realm/channel/peer object graph,
//! the fan-out and dispatch rules, and the boundary between local delivery
//! and mesh replication.
//!
//! ## Object graph
//!
//! A [`RealmRegistry`] holds one [`Realm`] per application. A realm owns
//! two indices: peers by session id and channels by scoped name. Peers and
//! channels hold non-owning back-references up to their realm; ownership
//! lives only in the realm's indices.
//!
//! ## Dispatch rules
//!
//! A signalling published by a local peer is dispatched to every other
//! local subscriber of its channel *and* replicated to the mesh. A
//! signalling arriving from the mesh is dispatched locally only: the
//! ingress path calls [`Channel::dispatch`] directly and never publishes,
//! which is what prevents replication loops.
//!
//! ```rust,ignore
//! use starling_fabric::{FabricConfig, RealmRegistry};
//! use starling_mesh::MemoryMesh;
//! use std::sync::Arc;
//!
//! let registry = RealmRegistry::new(
//!     FabricConfig::new("mesh-eu-1"),
//!     Arc::new(MemoryMesh::new()),
//! );
//! let realm = registry.get_or_create("APP", "credential").await?;
//! let peer = realm.add_peer(connection, "alice");
//! peer.join("room1").await?;
//! ```

pub mod channel;
pub mod diagnostics;
pub mod error;
pub mod peer;
pub mod realm;
pub mod registry;

// Re-export main types
pub use channel::*;
pub use diagnostics::*;
pub use error::*;
pub use peer::*;
pub use realm::*;
pub use registry::*;
