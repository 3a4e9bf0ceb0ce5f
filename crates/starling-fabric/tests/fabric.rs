//! End-to-end tests for the signaling fabric
//!
//! Exercises the realm/channel/peer graph through its public API with a
//! recording mesh connector (to observe publishes and inject ingress) and
//! the in-memory mesh (for true cross-node flows).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::time::timeout;

use starling_core::{MockConnection, Signalling, SignallingType};
use starling_fabric::{FabricConfig, FabricError, RealmRegistry};
use starling_mesh::{
    MemoryMesh, MeshConnector, MeshError, MeshLink, MeshOptions, MeshResult, MeshSender,
    MeshStream, TAG_BACKEND, TAG_INTER_NODE, Tag,
};

const RECV_WINDOW: Duration = Duration::from_secs(2);
const QUIET_WINDOW: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Recording mesh connector: counts connects, records publishes, and lets a
// test inject frames into every link's inbound stream.

#[derive(Default)]
struct RecordingInner {
    connects: AtomicUsize,
    published: Mutex<Vec<(Tag, Bytes)>>,
    taps: Mutex<Vec<mpsc::UnboundedSender<(Tag, Bytes)>>>,
}

#[derive(Clone, Default)]
struct RecordingMesh {
    inner: Arc<RecordingInner>,
}

impl RecordingMesh {
    fn new() -> Self {
        Self::default()
    }

    fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    fn publish_count(&self) -> usize {
        self.inner.published.lock().unwrap().len()
    }

    fn published(&self) -> Vec<(Tag, Bytes)> {
        self.inner.published.lock().unwrap().clone()
    }

    /// Deliver a frame to every link's inbound stream
    fn inject(&self, tag: Tag, frame: Bytes) {
        for tap in self.inner.taps.lock().unwrap().iter() {
            let _ = tap.send((tag, frame.clone()));
        }
    }
}

struct RecordingSender {
    inner: Arc<RecordingInner>,
}

#[async_trait]
impl MeshSender for RecordingSender {
    async fn publish(&self, tag: Tag, frame: Bytes) -> MeshResult<()> {
        self.inner.published.lock().unwrap().push((tag, frame));
        Ok(())
    }
}

struct TapStream {
    rx: mpsc::UnboundedReceiver<(Tag, Bytes)>,
}

#[async_trait]
impl MeshStream for TapStream {
    async fn recv(&mut self) -> Option<(Tag, Bytes)> {
        self.rx.recv().await
    }
}

#[async_trait]
impl MeshConnector for RecordingMesh {
    async fn connect(&self, _opts: MeshOptions) -> MeshResult<MeshLink> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.taps.lock().unwrap().push(tx);
        Ok(MeshLink {
            sender: Arc::new(RecordingSender {
                inner: self.inner.clone(),
            }),
            stream: Box::new(TapStream { rx }),
        })
    }
}

/// Connector whose links always fail to establish
struct BrokenMesh;

#[async_trait]
impl MeshConnector for BrokenMesh {
    async fn connect(&self, _opts: MeshOptions) -> MeshResult<MeshLink> {
        Err(MeshError::ConnectFailed("backplane unreachable".into()))
    }
}

// ---------------------------------------------------------------------------
// Helpers

fn registry_with(mesh: &RecordingMesh) -> RealmRegistry {
    RealmRegistry::new(FabricConfig::new("mesh-test"), Arc::new(mesh.clone()))
}

async fn recv_sig(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Signalling {
    let frame = timeout(RECV_WINDOW, rx.recv())
        .await
        .expect("frame should arrive")
        .expect("connection still open");
    Signalling::from_bytes(&frame).expect("valid signalling frame")
}

async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Bytes>) {
    assert!(
        timeout(QUIET_WINDOW, rx.recv()).await.is_err(),
        "expected no frame"
    );
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Bytes>) {
    while rx.try_recv().is_ok() {}
}

fn custom(channel: &str, payload: &str) -> Signalling {
    Signalling::new(SignallingType::Custom, "", channel, "").with_payload(payload.as_bytes().to_vec())
}

// ---------------------------------------------------------------------------
// Scenario 1: fan-out within a node

#[tokio::test]
async fn fan_out_within_a_node() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();
    assert_eq!(realm.id(), "APP");
    assert_eq!(realm.mesh_id(), "mesh-test");

    let (conn_a, mut rx_a) = MockConnection::pair("a");
    let (conn_b, mut rx_b) = MockConnection::pair("b");
    let (conn_c, mut rx_c) = MockConnection::pair("c");
    let a = realm.add_peer(conn_a, "alice");
    let b = realm.add_peer(conn_b, "bob");
    let c = realm.add_peer(conn_c, "carol");
    a.join("room1").await.unwrap();
    b.join("room1").await.unwrap();
    c.join("room1").await.unwrap();

    drain(&mut rx_a);
    drain(&mut rx_b);
    drain(&mut rx_c);
    let publishes_before = mesh.publish_count();

    a.broadcast(custom("room1", "hi")).await.unwrap();

    let got_b = recv_sig(&mut rx_b).await;
    let got_c = recv_sig(&mut rx_c).await;
    for got in [&got_b, &got_c] {
        assert_eq!(got.typ, SignallingType::Custom);
        assert_eq!(got.channel, "APP|room1");
        assert_eq!(got.sid, "a");
        assert_eq!(&got.payload[..], b"hi");
    }
    assert_quiet(&mut rx_b).await;
    assert_quiet(&mut rx_c).await;

    // The sender never hears its own frame locally.
    assert_quiet(&mut rx_a).await;

    // Exactly one replication, on the inter-node tag.
    assert_eq!(mesh.publish_count(), publishes_before + 1);
    let (tag, frame) = mesh.published().pop().unwrap();
    assert_eq!(tag, TAG_INTER_NODE);
    let replicated = Signalling::from_bytes(&frame).unwrap();
    assert_eq!(replicated.app_id, "APP");
    assert_eq!(&replicated.payload[..], b"hi");
}

// ---------------------------------------------------------------------------
// Scenario 2: cross-node ingress dispatches locally and never re-publishes

#[tokio::test]
async fn mesh_ingress_dispatches_without_republish() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();

    let (conn_b, mut rx_b) = MockConnection::pair("b");
    let b = realm.add_peer(conn_b, "bob");
    b.join("room1").await.unwrap();
    drain(&mut rx_b);
    let publishes_before = mesh.publish_count();

    let remote = Signalling::new(SignallingType::Custom, "APP", "APP|room1", "a")
        .with_payload(b"hi".to_vec());
    mesh.inject(TAG_INTER_NODE, Bytes::from(remote.to_bytes().unwrap()));

    let got = recv_sig(&mut rx_b).await;
    assert_eq!(&got.payload[..], b"hi");
    assert_eq!(got.sid, "a");
    assert_quiet(&mut rx_b).await;

    // Loop prevention: ingress produced zero new publishes.
    assert_eq!(mesh.publish_count(), publishes_before);
}

#[tokio::test]
async fn backend_tag_dispatches_like_inter_node() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();

    let (conn_b, mut rx_b) = MockConnection::pair("b");
    let b = realm.add_peer(conn_b, "bob");
    b.join("room1").await.unwrap();
    drain(&mut rx_b);
    let publishes_before = mesh.publish_count();

    let backend = Signalling::new(SignallingType::Control, "APP", "APP|room1", "svc")
        .with_event("announce");
    mesh.inject(TAG_BACKEND, Bytes::from(backend.to_bytes().unwrap()));

    let got = recv_sig(&mut rx_b).await;
    assert_eq!(got.typ, SignallingType::Control);
    assert_eq!(got.event, "announce");
    assert_eq!(mesh.publish_count(), publishes_before);
}

// ---------------------------------------------------------------------------
// Scenario 3: signallings for another app are dropped on ingress

#[tokio::test]
async fn mesh_ingress_drops_other_apps() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();

    let (conn_b, mut rx_b) = MockConnection::pair("b");
    let b = realm.add_peer(conn_b, "bob");
    b.join("room1").await.unwrap();
    drain(&mut rx_b);
    let publishes_before = mesh.publish_count();

    let foreign = Signalling::new(SignallingType::Custom, "OTHER", "APP|room1", "a")
        .with_payload(b"hi".to_vec());
    mesh.inject(TAG_INTER_NODE, Bytes::from(foreign.to_bytes().unwrap()));

    assert_quiet(&mut rx_b).await;
    assert_eq!(mesh.publish_count(), publishes_before);
}

// ---------------------------------------------------------------------------
// Scenario 4: ingress never creates channels

#[tokio::test]
async fn mesh_ingress_does_not_create_channels() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();

    let (conn_b, mut rx_b) = MockConnection::pair("b");
    let b = realm.add_peer(conn_b, "bob");
    b.join("room1").await.unwrap();
    drain(&mut rx_b);
    let publishes_before = mesh.publish_count();

    let unknown = Signalling::new(SignallingType::Custom, "APP", "APP|room2", "a")
        .with_payload(b"hi".to_vec());
    mesh.inject(TAG_INTER_NODE, Bytes::from(unknown.to_bytes().unwrap()));
    tokio::time::sleep(QUIET_WINDOW).await;

    assert!(realm.find_channel("APP|room2").is_none());
    assert_quiet(&mut rx_b).await;
    assert_eq!(mesh.publish_count(), publishes_before);
}

#[tokio::test]
async fn mesh_ingress_drops_undecodable_frames() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();

    let (conn_b, mut rx_b) = MockConnection::pair("b");
    let b = realm.add_peer(conn_b, "bob");
    b.join("room1").await.unwrap();
    drain(&mut rx_b);

    mesh.inject(TAG_INTER_NODE, Bytes::from_static(b"\xff\xff not msgpack"));

    assert_quiet(&mut rx_b).await;
    assert_eq!(realm.peer_count(), 1);
}

// ---------------------------------------------------------------------------
// Scenario 5: presence sequence, then disconnect

#[tokio::test]
async fn presence_sequence_on_join_and_leave() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();

    let (conn_o, mut rx_o) = MockConnection::pair("observer");
    let observer = realm.add_peer(conn_o, "olga");
    observer.join("room1").await.unwrap();
    drain(&mut rx_o);

    let (conn_p, mut rx_p) = MockConnection::pair("p");
    let p = realm.add_peer(conn_p, "pat");
    p.join("room1").await.unwrap();

    let online = recv_sig(&mut rx_o).await;
    assert_eq!(online.typ, SignallingType::PresenceOnline);
    assert_eq!(online.sid, "p");
    assert_eq!(&online.payload[..], b"pat");

    p.leave("room1").await.unwrap();
    let offline = recv_sig(&mut rx_o).await;
    assert_eq!(offline.typ, SignallingType::PresenceOffline);
    assert_eq!(offline.sid, "p");

    // Already out of the channel: disconnect emits nothing further.
    p.disconnect().await;
    assert_quiet(&mut rx_o).await;
    assert_quiet(&mut rx_p).await;
}

#[tokio::test]
async fn leave_then_disconnect_clears_indices_but_keeps_channel() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();

    let (conn_p, _rx_p) = MockConnection::pair("p");
    let p = realm.add_peer(conn_p, "pat");
    p.join("room1").await.unwrap();
    p.leave("room1").await.unwrap();
    p.disconnect().await;

    assert!(realm.find_peer("p").is_none());
    let channel = realm.find_channel("APP|room1").expect("channel retained");
    assert_eq!(channel.len(), 0);
    assert_eq!(p.channel_count(), 0);

    // Disconnect is idempotent.
    p.disconnect().await;
    assert!(realm.find_peer("p").is_none());
}

#[tokio::test]
async fn disconnect_leaves_every_joined_channel() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();

    let (conn_p, _rx_p) = MockConnection::pair("p");
    let p = realm.add_peer(conn_p, "pat");
    p.join("room1").await.unwrap();
    p.join("room2").await.unwrap();
    p.join("room3").await.unwrap();

    p.disconnect().await;

    for name in ["APP|room1", "APP|room2", "APP|room3"] {
        let channel = realm.find_channel(name).unwrap();
        assert!(!channel.contains("p"), "{name} still lists p");
    }
    assert_eq!(p.channel_count(), 0);
    assert!(realm.find_peer("p").is_none());
}

// ---------------------------------------------------------------------------
// Scenario 6: concurrent realm creation links the mesh exactly once

#[tokio::test]
async fn concurrent_realm_creation_is_atomic() {
    let mesh = RecordingMesh::new();
    let registry = Arc::new(registry_with(&mesh));

    let tasks = (0..100).map(|_| {
        let registry = registry.clone();
        tokio::spawn(async move { registry.get_or_create("APP", "cred").await.unwrap() })
    });
    let realms: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let first = &realms[0];
    assert!(realms.iter().all(|r| Arc::ptr_eq(first, r)));
    assert_eq!(mesh.connect_count(), 1);
    assert_eq!(registry.realms().len(), 1);
}

#[tokio::test]
async fn mesh_connect_failure_fails_realm_creation() {
    let registry = RealmRegistry::new(FabricConfig::new("mesh-test"), Arc::new(BrokenMesh));

    let result = registry.get_or_create("APP", "cred").await;
    assert!(matches!(result, Err(FabricError::Mesh(_))));
    assert!(registry.find("APP").is_none());

    // The next attempt is free to try again.
    assert!(registry.get_or_create("APP", "cred").await.is_err());
}

// ---------------------------------------------------------------------------
// Membership invariants

#[tokio::test]
async fn membership_maps_stay_consistent() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();

    let (conn_a, _rx_a) = MockConnection::pair("a");
    let (conn_b, _rx_b) = MockConnection::pair("b");
    let a = realm.add_peer(conn_a, "alice");
    let b = realm.add_peer(conn_b, "bob");

    a.join("room1").await.unwrap();
    a.join("room2").await.unwrap();
    b.join("room1").await.unwrap();
    b.leave("room1").await.unwrap();

    // Every channel member appears in the peer index, and membership is
    // recorded symmetrically on the peer and on the channel.
    for channel in realm.channels() {
        for peer in channel.peers() {
            assert!(peer.is_member(channel.name()));
            assert!(realm.find_peer(peer.sid()).is_some());
        }
    }
    assert!(a.is_member("APP|room1"));
    assert!(a.is_member("APP|room2"));
    assert!(!b.is_member("APP|room1"));
    assert!(realm.find_channel("APP|room1").unwrap().contains("a"));
    assert!(!realm.find_channel("APP|room1").unwrap().contains("b"));
}

#[tokio::test]
async fn rejoin_is_idempotent_but_reemits_presence() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();

    let (conn_o, mut rx_o) = MockConnection::pair("o");
    let observer = realm.add_peer(conn_o, "olga");
    observer.join("room1").await.unwrap();
    drain(&mut rx_o);

    let (conn_p, _rx_p) = MockConnection::pair("p");
    let p = realm.add_peer(conn_p, "pat");
    p.join("room1").await.unwrap();
    p.join("room1").await.unwrap();

    let channel = realm.find_channel("APP|room1").unwrap();
    assert_eq!(channel.len(), 2);
    assert_eq!(p.channel_count(), 1);

    // Presence was emitted once per join call.
    assert_eq!(recv_sig(&mut rx_o).await.typ, SignallingType::PresenceOnline);
    assert_eq!(recv_sig(&mut rx_o).await.typ, SignallingType::PresenceOnline);
}

#[tokio::test]
async fn leave_of_unjoined_channel_is_a_noop() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();

    let (conn_p, _rx_p) = MockConnection::pair("p");
    let p = realm.add_peer(conn_p, "pat");
    let publishes_before = mesh.publish_count();

    p.leave("room1").await.unwrap();
    assert_eq!(mesh.publish_count(), publishes_before);
}

#[tokio::test]
async fn broadcast_requires_membership() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();

    let (conn_p, _rx_p) = MockConnection::pair("p");
    let p = realm.add_peer(conn_p, "pat");

    let result = p.broadcast(custom("room1", "hi")).await;
    match result {
        Err(FabricError::NotMember { channel }) => assert_eq!(channel, "APP|room1"),
        other => panic!("expected NotMember, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_write_does_not_abort_dispatch() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();

    let (conn_a, _rx_a) = MockConnection::pair("a");
    let (conn_b, mut rx_b) = MockConnection::pair("b");
    let (conn_c, mut rx_c) = MockConnection::pair("c");
    let a = realm.add_peer(conn_a, "alice");
    let b = realm.add_peer(conn_b.clone(), "bob");
    let c = realm.add_peer(conn_c, "carol");
    a.join("room1").await.unwrap();
    b.join("room1").await.unwrap();
    c.join("room1").await.unwrap();
    drain(&mut rx_b);
    drain(&mut rx_c);

    // b's socket dies; delivery to c must still happen.
    conn_b.set_fail_writes(true);
    drop(rx_b);

    a.broadcast(custom("room1", "hi")).await.unwrap();
    let got = recv_sig(&mut rx_c).await;
    assert_eq!(&got.payload[..], b"hi");
}

// ---------------------------------------------------------------------------
// Cross-node flow over the in-memory mesh

#[tokio::test]
async fn two_nodes_share_a_channel_over_memory_mesh() {
    let mesh = MemoryMesh::new();
    let node1 = RealmRegistry::new(FabricConfig::new("mesh-eu"), Arc::new(mesh.clone()));
    let node2 = RealmRegistry::new(FabricConfig::new("mesh-us"), Arc::new(mesh.clone()));

    let realm1 = node1.get_or_create("APP", "cred").await.unwrap();
    let realm2 = node2.get_or_create("APP", "cred").await.unwrap();

    let (conn_b, mut rx_b) = MockConnection::pair("b");
    let b = realm2.add_peer(conn_b, "bob");
    b.join("room1").await.unwrap();

    let (conn_a, mut rx_a) = MockConnection::pair("a");
    let a = realm1.add_peer(conn_a, "alice");
    a.join("room1").await.unwrap();

    // Bob sees Alice come online across the mesh.
    let online = recv_sig(&mut rx_b).await;
    assert_eq!(online.typ, SignallingType::PresenceOnline);
    assert_eq!(online.sid, "a");

    // Bob's own join may still be in flight toward node1; let it land
    // before watching Alice's socket for echoes.
    tokio::time::sleep(QUIET_WINDOW).await;
    drain(&mut rx_a);

    a.broadcast(custom("room1", "hello from eu")).await.unwrap();
    let got = recv_sig(&mut rx_b).await;
    assert_eq!(got.typ, SignallingType::Custom);
    assert_eq!(got.sid, "a");
    assert_eq!(&got.payload[..], b"hello from eu");

    // Nothing reflects back to the publisher's node.
    assert_quiet(&mut rx_a).await;
}

#[tokio::test]
async fn realms_are_isolated_across_apps_on_shared_mesh() {
    let mesh = MemoryMesh::new();
    let node1 = RealmRegistry::new(FabricConfig::new("mesh-eu"), Arc::new(mesh.clone()));
    let node2 = RealmRegistry::new(FabricConfig::new("mesh-us"), Arc::new(mesh.clone()));

    let realm_app = node1.get_or_create("APP", "cred").await.unwrap();
    let realm_other = node2.get_or_create("OTHER", "cred").await.unwrap();

    let (conn_x, mut rx_x) = MockConnection::pair("x");
    let x = realm_other.add_peer(conn_x, "xeno");
    x.join("room1").await.unwrap();
    drain(&mut rx_x);

    let (conn_a, _rx_a) = MockConnection::pair("a");
    let a = realm_app.add_peer(conn_a, "alice");
    a.join("room1").await.unwrap();
    a.broadcast(custom("room1", "hi")).await.unwrap();

    // OTHER's subscriber shares the mesh but not the app: nothing arrives.
    assert_quiet(&mut rx_x).await;
}

// ---------------------------------------------------------------------------
// Diagnostics

#[tokio::test]
async fn connection_counts_written_as_json_lines() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);
    let realm = registry.get_or_create("APP", "cred").await.unwrap();

    let (conn_a, _rx_a) = MockConnection::pair("a");
    let (conn_b, _rx_b) = MockConnection::pair("b");
    let a = realm.add_peer(conn_a, "alice");
    let b = realm.add_peer(conn_b, "bob");
    a.join("room1").await.unwrap();
    a.join("room2").await.unwrap();
    b.join("room1").await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conns.log");
    starling_fabric::dump_connection_counts(&registry, &path)
        .await
        .unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1);
    let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(record["app_id"], "APP");
    assert_eq!(record["mesh_id"], "mesh-test");
    // One membership in room2, two in room1.
    assert_eq!(record["conns"], 3);
    assert!(record["timestamp"].is_i64());

    // Appending keeps earlier lines.
    starling_fabric::dump_connection_counts(&registry, &path)
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
}

#[tokio::test]
async fn empty_registry_writes_nothing() {
    let mesh = RecordingMesh::new();
    let registry = registry_with(&mesh);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conns.log");
    starling_fabric::dump_connection_counts(&registry, &path)
        .await
        .unwrap();
    assert!(!path.exists());
}
