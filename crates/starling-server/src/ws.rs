//! WebSocket client transport
//!
//! Accepts TLS WebSocket connections at the service path, runs the
//! authentication handshake, and then routes each binary frame through the
//! connection's peer: channel joins and leaves go to the membership
//! operations, everything else is broadcast into its channel. One WS
//! message is one signalling.
//!
//! Outbound frames are decoupled through an unbounded queue and a writer
//! task, so a slow client stalls only its own queue, never a dispatching
//! channel.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, info, warn};

use starling_core::{AuthHook, Connection, ConnectionError, Signalling, SignallingType};
use starling_fabric::{Peer, RealmRegistry};

/// Base path clients connect to
pub const SERVICE_PATH: &str = "/v1";

type WsStream = WebSocketStream<TlsStream<TcpStream>>;

/// Accept loop for the client listener. Runs until the listener fails.
pub async fn listen_and_serve(
    addr: String,
    tls: Arc<rustls::ServerConfig>,
    registry: Arc<RealmRegistry>,
    auth: AuthHook,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding client listener on {addr}"))?;
    info!(%addr, path = SERVICE_PATH, "websocket listener ready");
    let acceptor = TlsAcceptor::from(tls);

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "client accept failed");
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let registry = registry.clone();
        let auth = auth.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, peer_addr, acceptor, registry, auth).await {
                debug!(%peer_addr, error = %e, "connection ended");
            }
        });
    }
}

/// [`Connection`] backed by the outbound queue of one WebSocket session
struct WsConnection {
    addr: String,
    out: mpsc::UnboundedSender<Message>,
}

#[async_trait]
impl Connection for WsConnection {
    fn remote_address(&self) -> &str {
        &self.addr
    }

    async fn write(&self, frame: Bytes) -> Result<(), ConnectionError> {
        self.out
            .send(Message::Binary(frame))
            .map_err(|_| ConnectionError::Closed)
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    registry: Arc<RealmRegistry>,
    auth: AuthHook,
) -> anyhow::Result<()> {
    let tls_stream = acceptor.accept(stream).await.context("tls accept")?;
    let ws = tokio_tungstenite::accept_hdr_async(tls_stream, check_path)
        .await
        .context("websocket handshake")?;

    let (mut sink, mut frames) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let conn = Arc::new(WsConnection {
        addr: peer_addr.to_string(),
        out: out_tx,
    });

    let result = run_session(conn, &mut frames, &registry, &auth).await;
    writer.abort();
    result
}

/// Verify the upgrade request targets the service path
fn check_path(req: &Request, resp: Response) -> Result<Response, ErrorResponse> {
    if req.uri().path().starts_with(SERVICE_PATH) {
        Ok(resp)
    } else {
        let mut refuse = ErrorResponse::new(None);
        *refuse.status_mut() = tokio_tungstenite::tungstenite::http::StatusCode::NOT_FOUND;
        Err(refuse)
    }
}

async fn run_session(
    conn: Arc<WsConnection>,
    frames: &mut SplitStream<WsStream>,
    registry: &RealmRegistry,
    auth: &AuthHook,
) -> anyhow::Result<()> {
    // The first frame must authenticate; nothing exists for this client
    // until it does.
    let Some(first) = next_signalling(frames).await? else {
        return Ok(());
    };
    if first.typ != SignallingType::Auth {
        bail!("first frame was {}, expected auth", first.typ);
    }

    let public_key = String::from_utf8_lossy(&first.payload).into_owned();
    let Some(grant) = auth(&public_key) else {
        info!(addr = %conn.addr, "authentication refused");
        return Ok(());
    };

    let realm = registry
        .get_or_create(&grant.app_id, &grant.credential)
        .await
        .context("realm creation")?;
    let cid = if first.sid.is_empty() {
        conn.addr.clone()
    } else {
        first.sid.clone()
    };
    let peer = realm.add_peer(conn, &cid);

    let result = route_frames(&peer, frames).await;
    peer.disconnect().await;
    result
}

async fn route_frames(peer: &Arc<Peer>, frames: &mut SplitStream<WsStream>) -> anyhow::Result<()> {
    while let Some(sig) = next_signalling(frames).await? {
        match sig.typ {
            SignallingType::ChannelJoin => {
                peer.join(&sig.channel).await?;
            }
            SignallingType::ChannelLeave => {
                peer.leave(&sig.channel).await?;
            }
            SignallingType::Auth => {
                debug!(sid = %peer.sid(), "duplicate auth frame ignored");
            }
            _ => {
                if let Err(e) = peer.broadcast(sig).await {
                    debug!(sid = %peer.sid(), error = %e, "broadcast dropped");
                }
            }
        }
    }
    Ok(())
}

/// Next signalling on the socket, or `None` when the client is gone.
///
/// A frame that fails to decode is an error: malformed input closes this
/// connection and nothing else.
async fn next_signalling(frames: &mut SplitStream<WsStream>) -> anyhow::Result<Option<Signalling>> {
    while let Some(msg) = frames.next().await {
        let data = match msg.context("websocket read")? {
            Message::Binary(data) => data,
            Message::Close(_) => return Ok(None),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            Message::Text(_) => bail!("text frame on binary protocol"),
        };
        let sig = Signalling::from_bytes(&data).context("malformed signalling frame")?;
        return Ok(Some(sig));
    }
    Ok(None)
}
