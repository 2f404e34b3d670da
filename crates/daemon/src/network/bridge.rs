//! WebSocket bridge server.
//!
//! Accepts WebSocket connections, reads the `session` query parameter during
//! the handshake, and hands each connection to a [`ConnectionSession`] actor.
//! Two pump tasks translate between the socket and the actor's channels.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::session::{ClientEvent, ConnectionSession, Outbound, SessionContext};

/// Capacity of the client-to-session channel.
const CLIENT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the session-to-client channel.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// How long to wait for the client's close reply after a server close.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Name of the query parameter carrying the session name.
const SESSION_QUERY_PARAM: &str = "session";

/// Extracts a non-empty `session` parameter from a request query string.
pub fn session_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == SESSION_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Listens for bridge connections.
pub struct BridgeServer {
    listener: TcpListener,
    ctx: SessionContext,
}

impl BridgeServer {
    /// Binds the listener without accepting yet.
    pub async fn bind(addr: SocketAddr, ctx: SessionContext) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` is cancelled.
    ///
    /// Each connection's actor gets a child of `shutdown`, so connections
    /// still in the handshake are cancelled along with registered ones.
    pub async fn run(self, shutdown: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(addr = %addr, "Bridge listening");
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ctx = self.ctx.clone();
                        let cancel = shutdown.child_token();
                        tokio::spawn(handle_connection(stream, peer, ctx, cancel));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept bridge connection");
                    }
                },
            }
        }

        tracing::info!("Bridge stopped accepting connections");
    }
}

/// Runs one connection from handshake to close.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: SessionContext,
    cancel: CancellationToken,
) {
    let mut session_name = None;
    let callback = |request: &Request, response: Response| {
        session_name = session_from_query(request.uri().query());
        Ok::<_, ErrorResponse>(response)
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let id = Uuid::new_v4();
    tracing::info!(connection_id = %id, peer = %peer, session = ?session_name, "Bridge connection opened");

    let (client_tx, client_rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

    let (sink, stream) = ws.split();
    let writer = tokio::spawn(write_pump(sink, outbound_rx, id));
    let mut reader = tokio::spawn(read_pump(stream, client_tx, id));

    let mut session = ConnectionSession::new(id, session_name, ctx, client_rx, outbound_tx, cancel);
    session.run().await;
    drop(session);

    if let Err(e) = writer.await {
        tracing::warn!(connection_id = %id, error = %e, "Writer task failed");
    }
    if tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, &mut reader)
        .await
        .is_err()
    {
        reader.abort();
    }
}

type WsSink = futures_util::stream::SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type WsSource = futures_util::stream::SplitStream<WebSocketStream<TcpStream>>;

/// Forwards session frames to the socket until a close frame is sent.
async fn write_pump(mut sink: WsSink, mut outbound: mpsc::Receiver<Outbound>, id: Uuid) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            Outbound::Message(message) => {
                let kind = message.kind();
                let json = match message.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(connection_id = %id, kind, error = %e, "Failed to encode message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(json)).await {
                    tracing::debug!(connection_id = %id, kind, error = %e, "Failed to send message");
                    break;
                }
                tracing::trace!(connection_id = %id, kind, "Sent message");
            }
            Outbound::Close(request) => {
                let frame = request.map(|request| CloseFrame {
                    code: CloseCode::from(request.code),
                    reason: request.reason.into(),
                });
                if let Err(e) = sink.send(WsMessage::Close(frame)).await {
                    tracing::debug!(connection_id = %id, error = %e, "Failed to send close frame");
                }
                return;
            }
        }
    }

    // The session ended without asking for a close frame.
    let _ = sink.close().await;
}

/// Forwards client text frames to the session and reports the close.
async fn read_pump(mut stream: WsSource, events: mpsc::Sender<ClientEvent>, id: Uuid) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(WsMessage::Text(text)) => {
                if events.send(ClientEvent::Text(text)).await.is_err() {
                    return;
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    let _ = events.send(ClientEvent::Closed).await;
}
