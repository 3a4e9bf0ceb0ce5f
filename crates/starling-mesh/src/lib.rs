//! # Starling Mesh
//!
//! The streaming backplane that makes a channel globally continuous.
//!
//! A realm holds exactly one mesh link: an outbound [`MeshSender`] it
//! publishes inter-node traffic on, and an inbound [`MeshStream`] it
//! drains for frames published by peer nodes and backend services. Links
//! are created through a [`MeshConnector`], the seam that keeps the fabric
//! ignorant of what actually carries the bytes.
//!
//! Two connectors ship in-tree:
//!
//! - [`MemoryMesh`]: an in-process broker for tests and single-node runs
//! - [`TcpMeshConnector`]: a client for the length-delimited TCP broker
//!   ([`MeshBroker`]), which can run embedded in the server process
//!
//! Frames are keyed by a numeric [`Tag`]; [`TAG_INTER_NODE`] marks
//! node-to-node replication and [`TAG_BACKEND`] marks frames injected by
//! backend services. A link never receives its own publishes back.

pub mod broker;
pub mod error;
pub mod memory;
pub mod tags;
pub mod tcp;
pub mod transport;
pub mod wire;

// Re-export main types
pub use broker::*;
pub use error::*;
pub use memory::*;
pub use tags::*;
pub use tcp::*;
pub use transport::*;
pub use wire::*;
