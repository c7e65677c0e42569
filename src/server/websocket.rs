//! WebSocket transport for browser log viewers
//!
//! One text message per log line; a graceful end sends a Close frame.
//! Incoming messages are ignored apart from noticing the client leave.
//!
//! Architecture:
//! ```text
//! log file ──poll──► TailWatcher ──► StreamSession ──mpsc──► writer ──ws──► browser
//! ```

use super::{LogFileEndpoint, SessionGuard};
use crate::stream::EmitterStream;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// `GET {base}/logfile/ws`
///
/// The session is registered before the 101 goes out. If the upgrade never
/// completes, the dropped callback releases it.
pub async fn stream_logfile(
    State(endpoint): State<Arc<LogFileEndpoint>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let (guard, lines) = endpoint.open_session("websocket", peer);
    ws.on_upgrade(move |socket| serve(socket, peer, lines, guard))
}

/// Serve one WebSocket client until either side ends the stream
async fn serve(socket: WebSocket, peer: SocketAddr, mut lines: EmitterStream, guard: SessionGuard) {
    let (mut ws_sink, mut ws_source) = socket.split();

    loop {
        tokio::select! {
            // Channel -> WebSocket
            line = lines.recv() => match line {
                Some(line) => {
                    if let Err(e) = ws_sink.send(Message::Text(line.to_string().into())).await {
                        debug!("WebSocket client {} send failed: {}", peer, e);
                        break;
                    }
                }
                None => {
                    if lines.ended_gracefully() {
                        let frame = CloseFrame {
                            code: close_code::NORMAL,
                            reason: "end of stream".into(),
                        };
                        let _ = ws_sink.send(Message::Close(Some(frame))).await;
                    }
                    let _ = ws_sink.close().await;
                    break;
                }
            },

            // WebSocket -> nothing; only watch for the client leaving
            msg = ws_source.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    drop(guard);
    info!("WebSocket client disconnected: {}", peer);
}
