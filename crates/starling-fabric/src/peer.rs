//! One authenticated client connection within a realm

use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, info};

use starling_core::{Connection, Signalling, scoped_channel_name};

use crate::channel::Channel;
use crate::error::{FabricError, FabricResult};
use crate::realm::Realm;

/// A single connected client.
///
/// The peer's session id equals its connection's remote address, so it is
/// unique per node. The membership map is touched only by operations this
/// peer initiates; nothing else mutates it.
pub struct Peer {
    sid: String,
    cid: String,
    channels: DashMap<String, Arc<Channel>>,
    realm: Weak<Realm>,
    conn: Arc<dyn Connection>,
}

impl Peer {
    pub(crate) fn new(conn: Arc<dyn Connection>, cid: &str, realm: Weak<Realm>) -> Arc<Self> {
        Arc::new(Self {
            sid: conn.remote_address().to_string(),
            cid: cid.to_string(),
            channels: DashMap::new(),
            realm,
            conn,
        })
    }

    /// Session id, equal to the connection's remote address
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Client-chosen identifier, carried for application use
    pub fn cid(&self) -> &str {
        &self.cid
    }

    /// Number of channels this peer has joined
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Whether this peer is a member of the scoped channel
    pub fn is_member(&self, scoped: &str) -> bool {
        self.channels.contains_key(scoped)
    }

    fn realm(&self) -> FabricResult<Arc<Realm>> {
        self.realm.upgrade().ok_or(FabricError::RealmGone)
    }

    /// Join a channel by its client-visible name.
    ///
    /// Resolves or creates the channel under the scoped name, records the
    /// membership on both sides, and emits `presence-online` to the other
    /// local subscribers and to the mesh. Rejoining an already joined
    /// channel only re-emits presence.
    pub async fn join(self: &Arc<Self>, channel: &str) -> FabricResult<Arc<Channel>> {
        let realm = self.realm()?;
        let scoped = scoped_channel_name(realm.id(), channel);

        let channel = realm.get_or_add_channel(&scoped);
        channel.add_peer(self.clone());
        self.channels.insert(scoped.clone(), channel.clone());
        info!(sid = %self.sid, channel = %scoped, "peer joined channel");

        let sig = Signalling::presence_online(realm.id(), scoped, &self.sid, &self.cid);
        channel.dispatch(&sig).await;
        realm.broadcast_to_mesh(&sig).await;

        Ok(channel)
    }

    /// Leave a channel by its client-visible name.
    ///
    /// A no-op when the peer is not a member. Emits `presence-offline` to
    /// the remaining local subscribers and to the mesh.
    pub async fn leave(&self, channel: &str) -> FabricResult<()> {
        let realm = self.realm()?;
        let scoped = scoped_channel_name(realm.id(), channel);
        self.leave_scoped(&realm, &scoped).await;
        Ok(())
    }

    async fn leave_scoped(&self, realm: &Arc<Realm>, scoped: &str) {
        let Some((_, channel)) = self.channels.remove(scoped) else {
            debug!(sid = %self.sid, channel = %scoped, "leave of channel not joined");
            return;
        };
        channel.remove_peer(&self.sid);
        info!(sid = %self.sid, channel = %scoped, "peer left channel");

        let sig = Signalling::presence_offline(realm.id(), scoped, &self.sid, &self.cid);
        channel.dispatch(&sig).await;
        realm.broadcast_to_mesh(&sig).await;
    }

    /// Publish a signalling into one of this peer's channels.
    ///
    /// The signalling's channel field carries the client-visible name; it
    /// is rewritten to the scoped form, and the sender id and app id are
    /// stamped server-side. The peer must be a member of the target
    /// channel. Delivery goes to every other local subscriber and to the
    /// mesh; the sender never receives its own frame locally.
    pub async fn broadcast(&self, mut sig: Signalling) -> FabricResult<()> {
        let realm = self.realm()?;
        sig.channel = scoped_channel_name(realm.id(), &sig.channel);
        sig.app_id = realm.id().to_string();
        sig.sid = self.sid.clone();

        let Some(channel) = self.channels.get(&sig.channel).map(|e| e.value().clone()) else {
            return Err(FabricError::NotMember {
                channel: sig.channel,
            });
        };

        channel.dispatch(&sig).await;
        realm.broadcast_to_mesh(&sig).await;
        Ok(())
    }

    /// Serialize a signalling and deliver it on this peer's connection.
    ///
    /// The only place a frame is emitted to a client.
    pub async fn send(&self, sig: &Signalling) -> FabricResult<()> {
        let frame = Bytes::from(sig.to_bytes()?);
        self.conn.write(frame).await?;
        Ok(())
    }

    /// Tear this peer down: leave every joined channel (each emitting its
    /// own `presence-offline`), then drop out of the realm's peer index.
    /// Idempotent; a second call finds nothing to do.
    pub async fn disconnect(&self) {
        let Ok(realm) = self.realm() else {
            return;
        };

        let joined: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        for scoped in joined {
            self.leave_scoped(&realm, &scoped).await;
        }

        realm.remove_peer(&self.sid);
        info!(sid = %self.sid, "peer disconnected");
    }
}
