//! HTTP endpoint serving the log file
//!
//! An axum router under the management base path:
//! - `GET {base}/logfile` - whole current file
//! - `GET {base}/logfile/stream` - Server-Sent Events, one event per line
//! - `GET {base}/logfile/ws` - WebSocket, one text message per line
//! - `GET {base}/logfile/status` - JSON view of watchers and sessions
//!
//! Each streaming client gets its own [`StreamSession`] fed through a
//! bounded channel, so a slow client only ever slows itself.

pub mod router;
pub mod sse;
pub mod websocket;

use crate::config::{Config, ResolvedLogFile, StreamConfig};
use crate::error::{Result, StreamError};
use crate::stream::{self, EmitterStream, StreamSession, TailBroadcaster};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// Everything the logfile routes need; absent when the endpoint is disabled
pub struct LogFileEndpoint {
    pub log_file: ResolvedLogFile,
    pub broadcaster: TailBroadcaster,
    pub stream: StreamConfig,
}

impl LogFileEndpoint {
    pub fn new(log_file: ResolvedLogFile, config: &Config) -> Self {
        Self {
            log_file,
            broadcaster: TailBroadcaster::new(config.tail.watcher_options()),
            stream: config.stream.clone(),
        }
    }

    /// Register a new client session on the resolved file
    ///
    /// Called before the response is sent, so nothing appended after the
    /// client sees it is missed.
    fn open_session(
        &self,
        transport: &'static str,
        peer: SocketAddr,
    ) -> (SessionGuard, EmitterStream) {
        let (emitter, lines) = stream::channel(self.stream.transport_capacity);
        let session = StreamSession::new(
            emitter,
            self.stream.session_buffer_lines,
            transport,
            peer.to_string(),
        );
        self.broadcaster
            .subscribe(&self.log_file.path, session.clone());
        info!(
            "{} client {} following session {}",
            transport,
            peer,
            session.id()
        );
        (SessionGuard(session), lines)
    }
}

/// Ends its session when the transport side goes away
///
/// Owned by whatever drives the response (SSE body stream, WebSocket task
/// or its pending upgrade callback); dropping it is the disconnect.
struct SessionGuard(Arc<StreamSession>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.on_client_disconnect();
    }
}

/// Bound HTTP server, not yet accepting
pub struct Server {
    listener: TcpListener,
    app: Router,
    endpoint: Option<Arc<LogFileEndpoint>>,
    base_path: String,
}

impl Server {
    /// Bind the listener
    ///
    /// `endpoint = None` keeps the server up with every logfile route
    /// answering 404.
    pub async fn bind(config: &Config, endpoint: Option<LogFileEndpoint>) -> Result<Self> {
        let addr = format!("{}:{}", config.server.bind, config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| StreamError::Bind {
                addr: addr.clone(),
                source: e,
            })?;

        let endpoint = endpoint.map(Arc::new);
        let base_path = config.management.base_path.clone();
        Ok(Self {
            listener,
            app: router::build_router(&base_path, endpoint.clone()),
            endpoint,
            base_path,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|e| StreamError::Bind {
            addr: "listener".to_string(),
            source: e,
        })
    }

    /// Serve until `shutdown` is set, then end every stream and drain
    pub async fn run(self, shutdown: Arc<AtomicBool>) -> Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Listening on http://{}{}", addr, self.base_path);
        }

        let endpoint = self.endpoint.clone();
        let app = self
            .app
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown, endpoint))
            .await
            .map_err(|e| StreamError::Serve { source: e })?;

        info!("Server stopped");
        Ok(())
    }
}

/// Resolves once `shutdown` is set
///
/// Streams never finish on their own, so the broadcaster is shut down here;
/// every session then ends its stream and the graceful drain can complete.
async fn shutdown_signal(shutdown: Arc<AtomicBool>, endpoint: Option<Arc<LogFileEndpoint>>) {
    while !shutdown.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if let Some(endpoint) = endpoint {
        endpoint.broadcaster.shutdown();
    }
}
