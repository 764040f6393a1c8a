// WebSocket server for UI clients.
//
// Every accepted connection gets a monotonically increasing id, a read loop
// that forwards text frames to the app, and a write loop that drains the
// connection's outbound queue. Connecting to `/session/<code>` carries the
// code to the app as a join request.

use std::net::SocketAddr;

use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::protocol::{ConnId, Outbound};

/// Messages buffered per connection before the app starts dropping replies.
pub const OUTBOUND_CAPACITY: usize = 64;

/// Events emitted by the WebSocket server to the application layer.
#[derive(Debug)]
pub enum WsEvent {
    /// A client completed the handshake. `outbound` feeds its write loop.
    /// `join_code` is set when the client connected to `/session/<code>`.
    Connected {
        conn_id: ConnId,
        addr: String,
        outbound: mpsc::Sender<Outbound>,
        join_code: Option<String>,
    },
    /// A text message was received from the client (raw JSON string).
    Message { conn_id: ConnId, text: String },
    /// The client went away (close frame, read error, or EOF).
    Disconnected { conn_id: ConnId },
}

/// Bind the listener. Split from [`run`] so callers can bind port 0 and read
/// back the chosen address.
pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept connections forever, serving each on its own task. Returns when
/// the app side of `tx` is gone.
pub async fn run(listener: TcpListener, tx: mpsc::Sender<WsEvent>) -> anyhow::Result<()> {
    let mut next_id: ConnId = 0;

    loop {
        let (stream, addr) = listener.accept().await?;
        if tx.is_closed() {
            info!("App channel closed, WebSocket server stopping");
            break;
        }
        next_id += 1;
        debug!("Accepted TCP connection {} from {}", next_id, addr);
        tokio::spawn(serve_connection(stream, addr, next_id, tx.clone()));
    }

    Ok(())
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn_id: ConnId,
    tx: mpsc::Sender<WsEvent>,
) {
    let addr = addr.to_string();
    let mut path = String::new();
    let capture_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        path = request.uri().path().to_string();
        Ok(response)
    };
    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, capture_path).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };
    let join_code = session_code_from_path(&path);

    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
    if tx
        .send(WsEvent::Connected {
            conn_id,
            addr: addr.clone(),
            outbound: out_tx,
            join_code,
        })
        .await
        .is_err()
    {
        return;
    }
    info!("Client {conn_id} connected from {addr}");

    let (mut write, read) = ws_stream.split();

    let writer = tokio::spawn(async move {
        while let Some(outbound) = out_rx.recv().await {
            let json = match serde_json::to_string(&outbound) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize outbound message: {e}");
                    continue;
                }
            };
            if write.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    let _ = process_message_stream(read, conn_id, &tx, &addr).await;

    let _ = tx.send(WsEvent::Disconnected { conn_id }).await;
    writer.abort();
    info!("Client {conn_id} ({addr}) disconnected");
}

/// Session code from a `/session/<code>` request path, upper-cased.
pub fn session_code_from_path(path: &str) -> Option<String> {
    let code = path.strip_prefix("/session/")?.trim_end_matches('/');
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(code.to_ascii_uppercase())
}

/// Forward text frames from any message [`Stream`] through `tx`. Stops at a
/// close frame or read error. Returns `Err(())` if the app side of the
/// channel is closed.
pub async fn process_message_stream<St>(
    mut stream: St,
    conn_id: ConnId,
    tx: &mpsc::Sender<WsEvent>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let event = WsEvent::Message {
                    conn_id,
                    text: text.to_string(),
                };
                if tx.send(event).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Binary, Ping, Pong, Frame
            }
        }
    }
    Ok(())
}
