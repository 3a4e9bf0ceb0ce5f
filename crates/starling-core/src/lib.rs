//! # Starling Core
//!
//! Core types and seams for the Starling presence and signaling bus.
//!
//! This crate defines the vocabulary shared by every other Starling crate:
//! the [`Signalling`] envelope and its wire codec, the [`Connection`]
//! capability that both client transports satisfy, the injectable
//! authentication hook, and scoped channel naming.
//!
//! ## Key Types
//!
//! - [`Signalling`]: the unit of exchange between peers and across the mesh
//! - [`Connection`]: "has a stable remote identifier and accepts a frame"
//! - [`AuthHook`]: public key in, application grant or refusal out
//! - [`scoped_channel_name`]: `"{app_id}|{channel}"` index keys

pub mod auth;
pub mod connection;
pub mod error;
pub mod mock_connection;
pub mod scope;
pub mod signalling;

// Re-export main types
pub use auth::*;
pub use connection::*;
pub use error::*;
pub use mock_connection::*;
pub use scope::*;
pub use signalling::*;
