//! Per-application root of the fabric

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use starling_core::{Connection, Signalling};
use starling_mesh::{MeshConnector, MeshLink, MeshOptions, MeshResult, MeshSender, TAG_INTER_NODE, Tag};

use crate::channel::Channel;
use crate::peer::Peer;

/// Per-application registry of channels and peers, and the bridge to the
/// mesh backplane.
///
/// A realm is created lazily on the first authenticated connection for its
/// application and then retained for the life of the process. Ownership of
/// peers and channels lives in the two indices here; everything else holds
/// non-owning references.
pub struct Realm {
    id: String,
    mesh_id: String,
    channels: DashMap<String, Arc<Channel>>,
    peers: DashMap<String, Arc<Peer>>,
    mesh: OnceLock<Arc<dyn MeshSender>>,
    ingress_task: OnceLock<JoinHandle<()>>,
}

impl Realm {
    pub(crate) fn new(id: &str, mesh_id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            mesh_id: mesh_id.to_string(),
            channels: DashMap::new(),
            peers: DashMap::new(),
            mesh: OnceLock::new(),
            ingress_task: OnceLock::new(),
        })
    }

    /// Application id this realm serves
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identity of this node in the mesh
    pub fn mesh_id(&self) -> &str {
        &self.mesh_id
    }

    /// Construct a peer for an accepted connection and index it by the
    /// connection's remote address. Joins no channels.
    pub fn add_peer(self: &Arc<Self>, conn: Arc<dyn Connection>, cid: &str) -> Arc<Peer> {
        let peer = Peer::new(conn, cid, Arc::downgrade(self));
        info!(realm = %self.id, sid = %peer.sid(), cid = %cid, "peer added");
        self.peers.insert(peer.sid().to_string(), peer.clone());
        peer
    }

    /// Drop a peer from the index
    pub fn remove_peer(&self, sid: &str) {
        self.peers.remove(sid);
    }

    /// Look up a peer by session id
    pub fn find_peer(&self, sid: &str) -> Option<Arc<Peer>> {
        self.peers.get(sid).map(|e| e.value().clone())
    }

    /// Number of peers currently connected to this realm
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Resolve or create the channel under a scoped name.
    ///
    /// Channels are retained even when their last local subscriber
    /// leaves; the index grows with the number of distinct names only.
    pub fn get_or_add_channel(self: &Arc<Self>, name: &str) -> Arc<Channel> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(realm = %self.id, channel = %name, "channel created");
                Channel::new(name, Arc::downgrade(self))
            })
            .clone()
    }

    /// Look up a channel by scoped name, without creating it
    pub fn find_channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(name).map(|e| e.value().clone())
    }

    /// Snapshot of the current channels
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().map(|e| e.value().clone()).collect()
    }

    /// Replicate a locally published signalling to the other nodes.
    ///
    /// Fire-and-forget: encode or publish failures are logged and the
    /// frame is dropped; local dispatch has already happened by the time
    /// this is called.
    pub async fn broadcast_to_mesh(&self, sig: &Signalling) {
        let Some(sender) = self.mesh.get() else {
            debug!(realm = %self.id, "mesh not linked; skipping publish");
            return;
        };
        let frame = match sig.to_bytes() {
            Ok(frame) => Bytes::from(frame),
            Err(e) => {
                error!(realm = %self.id, error = %e, "encoding signalling for mesh failed");
                return;
            }
        };
        if let Err(e) = sender.publish(TAG_INTER_NODE, frame).await {
            error!(realm = %self.id, error = %e, "mesh publish failed");
        }
    }

    /// Establish this realm's mesh link and start draining its inbound
    /// stream. Called exactly once, by the registry, while the realm is
    /// being created; a connect failure fails the creation.
    pub(crate) async fn connect_to_mesh(
        self: &Arc<Self>,
        connector: &dyn MeshConnector,
        opts: MeshOptions,
    ) -> MeshResult<()> {
        let MeshLink { sender, mut stream } = connector.connect(opts).await?;
        let _ = self.mesh.set(sender);

        let realm = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some((tag, frame)) = stream.recv().await {
                let Some(realm) = realm.upgrade() else {
                    break;
                };
                realm.ingress(tag, frame).await;
            }
            debug!("mesh ingress stream ended");
        });
        let _ = self.ingress_task.set(task);

        info!(realm = %self.id, mesh_id = %self.mesh_id, "realm linked to mesh");
        Ok(())
    }

    /// Handle one frame observed on the mesh.
    ///
    /// Dispatches locally and nothing more; mesh-originated signallings
    /// are never re-published, which prevents loops without any hop
    /// counting. A channel that does not exist locally is not created:
    /// with no local subscribers there is no one to deliver to.
    async fn ingress(&self, tag: Tag, frame: Bytes) {
        let sig = match Signalling::from_bytes(&frame) {
            Ok(sig) => sig,
            Err(e) => {
                error!(
                    realm = %self.id,
                    error = %e,
                    raw = ?&frame[..],
                    "undecodable signalling from mesh"
                );
                return;
            }
        };

        if sig.app_id != self.id {
            debug!(realm = %self.id, app_id = %sig.app_id, "ignoring mesh frame for another app");
            return;
        }

        match self.find_channel(&sig.channel) {
            Some(channel) => {
                channel.dispatch(&sig).await;
                debug!(realm = %self.id, tag, channel = %sig.channel, "mesh frame dispatched");
            }
            None => {
                debug!(realm = %self.id, channel = %sig.channel, "mesh frame for channel with no local subscribers");
            }
        }
    }
}

impl Drop for Realm {
    fn drop(&mut self) {
        if let Some(task) = self.ingress_task.get() {
            task.abort();
        }
    }
}
