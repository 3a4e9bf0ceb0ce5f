//! The signalling envelope exchanged between peers and across the mesh
//!
//! Serialized as MessagePack maps with string keys, identical on the
//! client-facing transport and on the mesh backplane. Decoding tolerates
//! fields it does not know about, so nodes of different versions can share
//! a mesh.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{SignallingError, SignallingResult};

/// Kind of a signalling frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignallingType {
    /// Authentication handshake, the first frame on every connection
    Auth,
    /// Server control traffic
    Control,
    /// A peer became visible on a channel
    PresenceOnline,
    /// A peer left a channel
    PresenceOffline,
    /// Application-defined presence state update
    PresenceState,
    /// Request to join a channel
    ChannelJoin,
    /// Request to leave a channel
    ChannelLeave,
    /// Application-defined signaling
    Custom,
}

impl SignallingType {
    /// The wire name of this frame kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Control => "control",
            Self::PresenceOnline => "presence-online",
            Self::PresenceOffline => "presence-offline",
            Self::PresenceState => "presence-state",
            Self::ChannelJoin => "channel-join",
            Self::ChannelLeave => "channel-leave",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for SignallingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The unit of exchange between peers and across the mesh.
///
/// A value type: created per message, routed, delivered, and dropped.
/// Nothing stores a `Signalling` beyond dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signalling {
    /// Frame kind
    #[serde(rename = "type")]
    pub typ: SignallingType,
    /// Application this frame belongs to
    #[serde(default)]
    pub app_id: String,
    /// Channel the frame targets (scoped form once inside the server)
    #[serde(default)]
    pub channel: String,
    /// Session id of the sender
    #[serde(default)]
    pub sid: String,
    /// Application event name
    #[serde(default)]
    pub event: String,
    /// Opaque payload bytes
    #[serde(default)]
    pub payload: Bytes,
}

impl Signalling {
    /// Create a signalling with empty event and payload
    pub fn new(
        typ: SignallingType,
        app_id: impl Into<String>,
        channel: impl Into<String>,
        sid: impl Into<String>,
    ) -> Self {
        Self {
            typ,
            app_id: app_id.into(),
            channel: channel.into(),
            sid: sid.into(),
            event: String::new(),
            payload: Bytes::new(),
        }
    }

    /// Set the application event name
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    /// Set the payload bytes
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Presence emission for a peer that joined a channel.
    ///
    /// The payload carries the peer's client-chosen cid so subscribers can
    /// attribute the event.
    pub fn presence_online(
        app_id: impl Into<String>,
        channel: impl Into<String>,
        sid: impl Into<String>,
        cid: &str,
    ) -> Self {
        Self::new(SignallingType::PresenceOnline, app_id, channel, sid)
            .with_payload(Bytes::copy_from_slice(cid.as_bytes()))
    }

    /// Presence emission for a peer that left a channel
    pub fn presence_offline(
        app_id: impl Into<String>,
        channel: impl Into<String>,
        sid: impl Into<String>,
        cid: &str,
    ) -> Self {
        Self::new(SignallingType::PresenceOffline, app_id, channel, sid)
            .with_payload(Bytes::copy_from_slice(cid.as_bytes()))
    }

    /// Serialize to MessagePack bytes with string field names
    pub fn to_bytes(&self) -> SignallingResult<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(SignallingError::from)
    }

    /// Deserialize from MessagePack bytes, ignoring unknown fields
    pub fn from_bytes(data: &[u8]) -> SignallingResult<Self> {
        rmp_serde::from_slice(data).map_err(SignallingError::from)
    }
}
