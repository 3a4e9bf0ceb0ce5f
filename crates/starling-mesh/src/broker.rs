//! TCP mesh broker
//!
//! The rendezvous point mesh links connect to. Each accepted connection
//! identifies itself with a `Hello`, then receives every `Data` frame
//! published by *other* links whose tag it observes. The broker never
//! echoes a frame back to its origin, which is what keeps a node from
//! hearing its own replication.
//!
//! The server process can run one of these embedded (`WITH_MESH_BROKER`)
//! or point its links at a broker running elsewhere.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};

use crate::error::MeshResult;
use crate::tags::Tag;
use crate::wire::MeshFrame;

struct BrokerClient {
    name: String,
    observe: Vec<Tag>,
    outbox: mpsc::UnboundedSender<Bytes>,
}

struct Inner {
    credential: Option<String>,
    clients: DashMap<u64, BrokerClient>,
    next_id: AtomicU64,
}

/// Tag-keyed pub/sub broker over length-delimited TCP
#[derive(Clone)]
pub struct MeshBroker {
    inner: Arc<Inner>,
}

impl MeshBroker {
    /// Create a broker. With `Some(credential)`, links presenting anything
    /// else are refused during the hello exchange.
    pub fn new(credential: Option<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                credential,
                clients: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Bind and start serving in a background task.
    ///
    /// Returns the bound address, which is the useful part when callers
    /// bind port 0.
    pub async fn bind(&self, addr: &str) -> MeshResult<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "mesh broker listening");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let inner = inner.clone();
                        tokio::spawn(serve_conn(inner, stream, peer));
                    }
                    Err(e) => {
                        warn!(error = %e, "mesh broker accept failed");
                    }
                }
            }
        });

        Ok(local)
    }

    /// Number of currently connected links
    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }
}

async fn serve_conn(inner: Arc<Inner>, stream: TcpStream, peer: SocketAddr) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    let hello = match framed.next().await {
        Some(Ok(buf)) => MeshFrame::from_bytes(&buf),
        _ => return,
    };
    let (name, credential, observe) = match hello {
        Ok(MeshFrame::Hello {
            name,
            credential,
            observe,
        }) => (name, credential, observe),
        Ok(_) | Err(_) => {
            warn!(%peer, "mesh client did not open with hello");
            return;
        }
    };

    if let Some(expected) = &inner.credential {
        if &credential != expected {
            warn!(%peer, name = %name, "mesh link refused: bad credential");
            return;
        }
    }

    let welcome = match MeshFrame::Welcome.to_bytes() {
        Ok(frame) => frame,
        Err(e) => {
            error!(error = %e, "encoding welcome failed");
            return;
        }
    };
    if framed.send(welcome).await.is_err() {
        return;
    }

    let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
    let (outbox, mut rx) = mpsc::unbounded_channel::<Bytes>();
    inner.clients.insert(
        id,
        BrokerClient {
            name: name.clone(),
            observe,
            outbox,
        },
    );
    info!(link = id, name = %name, %peer, "mesh link accepted");

    let (mut sink, mut frames) = framed.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    while let Some(next) = frames.next().await {
        let buf = match next {
            Ok(buf) => buf,
            Err(e) => {
                warn!(link = id, error = %e, "mesh read failed");
                break;
            }
        };
        match MeshFrame::from_bytes(&buf) {
            Ok(MeshFrame::Data { tag, payload }) => fan_out(&inner, id, tag, payload),
            Ok(_) => debug!(link = id, "ignoring unexpected frame after hello"),
            Err(e) => warn!(link = id, error = %e, raw = ?&buf[..], "undecodable mesh frame"),
        }
    }

    inner.clients.remove(&id);
    writer.abort();
    info!(link = id, name = %name, "mesh link closed");
}

fn fan_out(inner: &Inner, origin: u64, tag: Tag, payload: Bytes) {
    let frame = match (MeshFrame::Data { tag, payload }).to_bytes() {
        Ok(frame) => frame,
        Err(e) => {
            error!(error = %e, "encoding fan-out frame failed");
            return;
        }
    };
    for entry in inner.clients.iter() {
        if *entry.key() == origin || !entry.value().observe.contains(&tag) {
            continue;
        }
        let _ = entry.value().outbox.send(frame.clone());
    }
}
