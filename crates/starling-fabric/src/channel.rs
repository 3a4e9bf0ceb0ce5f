//! Named fan-out groups within a realm

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::warn;

use starling_core::Signalling;

use crate::peer::Peer;
use crate::realm::Realm;

/// A named fan-out group scoped to a realm.
///
/// The channel indexes the local peers subscribed to it; it does not own
/// them. Membership is mutated only through [`Peer::join`] and
/// [`Peer::leave`], which keep the peer's own membership map and this set
/// consistent with each other.
pub struct Channel {
    name: String,
    peers: DashMap<String, Arc<Peer>>,
    realm: Weak<Realm>,
}

impl Channel {
    pub(crate) fn new(name: &str, realm: Weak<Realm>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            peers: DashMap::new(),
            realm,
        })
    }

    /// The scoped channel name, unique within the realm's index
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The realm this channel belongs to
    pub fn realm(&self) -> Option<Arc<Realm>> {
        self.realm.upgrade()
    }

    /// Current local subscriber count
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the channel has no local subscribers
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Whether a peer with this sid is subscribed
    pub fn contains(&self, sid: &str) -> bool {
        self.peers.contains_key(sid)
    }

    /// Snapshot of the current local subscribers
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub(crate) fn add_peer(&self, peer: Arc<Peer>) {
        self.peers.insert(peer.sid().to_string(), peer);
    }

    pub(crate) fn remove_peer(&self, sid: &str) {
        self.peers.remove(sid);
    }

    /// Deliver a signalling to every local subscriber except its sender.
    ///
    /// Returns once every recipient has been attempted. A failed write is
    /// logged and skipped; it never aborts delivery to the rest. The peer
    /// set is snapshotted up front so no index guard is held across a
    /// socket write.
    pub async fn dispatch(&self, sig: &Signalling) {
        let recipients: Vec<Arc<Peer>> = self
            .peers
            .iter()
            .filter(|entry| entry.key() != &sig.sid)
            .map(|entry| entry.value().clone())
            .collect();

        for peer in recipients {
            if let Err(e) = peer.send(sig).await {
                warn!(
                    channel = %self.name,
                    sid = %peer.sid(),
                    error = %e,
                    "dropping frame for unreachable peer"
                );
            }
        }
    }
}
