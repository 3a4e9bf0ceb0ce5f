//! TCP mesh client
//!
//! Connects a realm to a [`MeshBroker`](crate::broker::MeshBroker) over a
//! single duplex link: the sink half publishes, the stream half delivers
//! observed frames. One connection carries both halves of the link, and
//! the broker knows it by its sender identity.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as TokioMutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, warn};

use crate::error::{MeshError, MeshResult};
use crate::tags::Tag;
use crate::transport::{MeshConnector, MeshLink, MeshOptions, MeshSender, MeshStream};
use crate::wire::MeshFrame;

type MeshSocket = Framed<TcpStream, LengthDelimitedCodec>;

/// Connector for links to a TCP mesh broker
pub struct TcpMeshConnector {
    endpoint: String,
}

impl TcpMeshConnector {
    /// Create a connector targeting `host:port`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl MeshConnector for TcpMeshConnector {
    async fn connect(&self, opts: MeshOptions) -> MeshResult<MeshLink> {
        let stream = TcpStream::connect(&self.endpoint)
            .await
            .map_err(|e| MeshError::ConnectFailed(format!("{}: {e}", self.endpoint)))?;
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

        let hello = MeshFrame::Hello {
            name: opts.sender_name.clone(),
            credential: opts.credential.clone(),
            observe: opts.observe.clone(),
        };
        framed.send(hello.to_bytes()?).await?;

        match framed.next().await {
            Some(Ok(buf)) => match MeshFrame::from_bytes(&buf)? {
                MeshFrame::Welcome => {}
                other => {
                    return Err(MeshError::Rejected(format!(
                        "unexpected handshake reply: {other:?}"
                    )));
                }
            },
            _ => {
                return Err(MeshError::Rejected(
                    "broker closed the link during handshake".into(),
                ));
            }
        }
        debug!(
            endpoint = %self.endpoint,
            sender = %opts.sender_name,
            receiver = %opts.receiver_name,
            "mesh link established"
        );

        let (sink, stream) = framed.split();
        Ok(MeshLink {
            sender: Arc::new(TcpMeshSender {
                sink: TokioMutex::new(sink),
            }),
            stream: Box::new(TcpMeshStream { stream }),
        })
    }
}

struct TcpMeshSender {
    sink: TokioMutex<SplitSink<MeshSocket, Bytes>>,
}

#[async_trait]
impl MeshSender for TcpMeshSender {
    async fn publish(&self, tag: Tag, frame: Bytes) -> MeshResult<()> {
        let encoded = (MeshFrame::Data { tag, payload: frame }).to_bytes()?;
        self.sink
            .lock()
            .await
            .send(encoded)
            .await
            .map_err(|e| MeshError::PublishFailed(e.to_string()))
    }
}

struct TcpMeshStream {
    stream: SplitStream<MeshSocket>,
}

#[async_trait]
impl MeshStream for TcpMeshStream {
    async fn recv(&mut self) -> Option<(Tag, Bytes)> {
        loop {
            let buf = match self.stream.next().await? {
                Ok(buf) => buf,
                Err(e) => {
                    warn!(error = %e, "mesh stream read failed");
                    return None;
                }
            };
            match MeshFrame::from_bytes(&buf) {
                Ok(MeshFrame::Data { tag, payload }) => return Some((tag, payload)),
                Ok(other) => debug!(frame = ?other, "ignoring non-data mesh frame"),
                Err(e) => warn!(error = %e, raw = ?&buf[..], "undecodable mesh frame"),
            }
        }
    }
}
