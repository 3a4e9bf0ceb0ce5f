//! Broker protocol frames
//!
//! The TCP mesh speaks length-delimited MessagePack frames. A link opens
//! with `Hello`, the broker answers `Welcome`, and everything after is
//! `Data`. This protocol is internal to the backplane; signalling frames
//! ride inside `Data` payloads untouched.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::MeshResult;
use crate::tags::Tag;

/// One frame of the broker protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeshFrame {
    /// First frame from a client: identify and subscribe
    Hello {
        /// Publishing identity of the link
        name: String,
        /// Shared credential; checked when the broker has one configured
        credential: String,
        /// Tags the link wants delivered
        observe: Vec<Tag>,
    },
    /// Broker's acceptance of a `Hello`
    Welcome,
    /// One published frame
    Data { tag: Tag, payload: Bytes },
}

impl MeshFrame {
    /// Serialize for the length-delimited transport
    pub fn to_bytes(&self) -> MeshResult<Bytes> {
        Ok(Bytes::from(rmp_serde::to_vec(self)?))
    }

    /// Deserialize one length-delimited frame
    pub fn from_bytes(data: &[u8]) -> MeshResult<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::TAG_INTER_NODE;

    #[test]
    fn test_roundtrip_hello() {
        let frame = MeshFrame::Hello {
            name: "starling-sndr-APP".into(),
            credential: "token".into(),
            observe: vec![0x20, 0x21],
        };
        let decoded = MeshFrame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_roundtrip_data() {
        let frame = MeshFrame::Data {
            tag: TAG_INTER_NODE,
            payload: Bytes::from_static(b"\x82\xa4type\xa4auth"),
        };
        let decoded = MeshFrame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(MeshFrame::from_bytes(b"\xff\xff\xff").is_err());
    }
}
