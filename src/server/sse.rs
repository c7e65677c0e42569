//! Server-Sent Events transport
//!
//! One `data:` event per log line. A graceful end sends `event: end`
//! before the response finishes; an idle stream gets a keep-alive comment
//! every `stream.keep_alive_secs`, which is also how a silently vanished
//! client is noticed.

use super::{LogFileEndpoint, SessionGuard};
use crate::stream::EmitterStream;
use axum::extract::{ConnectInfo, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Frame one line as an SSE event
///
/// A bare `\r` would end the field early, so it starts another `data:` field.
pub fn format_event(line: &str) -> Event {
    if line.contains('\r') {
        Event::default().data(line.replace('\r', "\n"))
    } else {
        Event::default().data(line)
    }
}

/// Final event of a gracefully ended stream
pub fn end_event() -> Event {
    Event::default().event("end").data("")
}

/// `GET {base}/logfile/stream`
pub async fn stream_logfile(
    State(endpoint): State<Arc<LogFileEndpoint>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (guard, lines) = endpoint.open_session("sse", peer);
    let keep_alive = Duration::from_secs(endpoint.stream.keep_alive_secs.max(1));

    Sse::new(events(lines, guard, peer)).keep_alive(
        KeepAlive::new()
            .interval(keep_alive)
            .text("keep-alive"),
    )
}

enum Phase {
    Connected,
    Streaming,
    Ended,
}

/// Event stream for one client; dropping it (client gone) closes the session
fn events(
    lines: EmitterStream,
    guard: SessionGuard,
    peer: SocketAddr,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        (Phase::Connected, lines, guard),
        move |(phase, mut lines, guard)| async move {
            match phase {
                Phase::Connected => Some((
                    Ok(Event::default().comment("connected")),
                    (Phase::Streaming, lines, guard),
                )),
                Phase::Streaming => match lines.recv().await {
                    Some(line) => Some((Ok(format_event(&line)), (Phase::Streaming, lines, guard))),
                    None if lines.ended_gracefully() => {
                        info!("SSE stream to {} ended", peer);
                        Some((Ok(end_event()), (Phase::Ended, lines, guard)))
                    }
                    None => None,
                },
                Phase::Ended => None,
            }
        },
    )
}
