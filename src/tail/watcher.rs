//! Poll loop for one tailed file
//!
//! Each watcher owns a [`FileCursor`] inside a tokio task. On every tick it
//! reads what was appended, splits it into lines and fans them out to the
//! registered sessions. The watcher does NOT decide when it is no longer
//! needed; the broadcaster stops it once its last subscriber leaves.
//!
//! Read failures:
//! - "not found" rewinds the cursor and opens a grace window; a file that
//!   reappears is streamed from its first byte, one still missing when the
//!   window expires ends every subscriber's stream and the watcher exits
//! - anything else is retried on the next tick

use super::cursor::{FileCursor, StartPosition};
use super::decoder::LineDecoder;
use crate::error::StreamError;
use crate::stream::stats::{WatcherSnapshot, WatcherStats};
use crate::stream::{CloseReason, SessionId, StreamSession};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Watcher identity, distinguishes successive watchers of one path
pub type WatcherId = u64;

/// Called when the watcher ends on its own (file permanently gone)
pub type ExitHook = Box<dyn FnOnce(WatcherId) + Send>;

/// Tuning for a watcher's poll loop
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub poll_interval: Duration,
    pub missing_grace: Duration,
    pub start: StartPosition,
    pub max_read_bytes: usize,
    pub max_line_bytes: usize,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        crate::config::TailConfig::default().watcher_options()
    }
}

struct Subscribers {
    sessions: HashMap<SessionId, Arc<StreamSession>>,
    /// Set once the poll task gave up; no new subscribers accepted
    terminated: bool,
}

/// Tails one file and feeds its subscribers
pub struct TailWatcher {
    id: WatcherId,
    path: PathBuf,
    options: WatcherOptions,
    subscribers: Arc<Mutex<Subscribers>>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<WatcherStats>,
    started: bool,
}

impl TailWatcher {
    pub fn new(id: WatcherId, path: impl Into<PathBuf>, options: WatcherOptions) -> Self {
        Self {
            id,
            path: path.into(),
            options,
            subscribers: Arc::new(Mutex::new(Subscribers {
                sessions: HashMap::new(),
                terminated: false,
            })),
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(WatcherStats::new()),
            started: false,
        }
    }

    pub fn id(&self) -> WatcherId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> WatcherSnapshot {
        self.stats.snapshot()
    }

    /// Spawn the poll task; must run inside a tokio runtime
    ///
    /// The cursor is positioned here, so with `StartPosition::End` only
    /// content appended after this call is streamed.
    pub fn start(&mut self, on_exit: ExitHook) {
        if self.started {
            return;
        }
        self.started = true;

        let cursor = FileCursor::new(
            &self.path,
            self.options.start,
            self.options.max_read_bytes,
        );
        self.stats.set_offset(cursor.offset());

        let task = PollTask {
            id: self.id,
            cursor: Some(cursor),
            decoder: LineDecoder::new(self.options.max_line_bytes),
            options: self.options.clone(),
            subscribers: self.subscribers.clone(),
            shutdown: self.shutdown.clone(),
            stats: self.stats.clone(),
        };

        info!("Tailing {}", self.path.display());
        tokio::spawn(task.run(on_exit));
    }

    /// Halt the poll loop; the cursor is released when the task exits
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Register a session; `false` if the watcher already gave up
    pub fn add_subscriber(&self, session: Arc<StreamSession>) -> bool {
        let mut subs = self.subscribers.lock();
        if subs.terminated {
            return false;
        }
        subs.sessions.insert(session.id(), session);
        true
    }

    /// Unregister a session; returns whether no subscriber is left
    pub fn remove_subscriber(&self, id: SessionId) -> bool {
        let mut subs = self.subscribers.lock();
        subs.sessions.remove(&id);
        subs.sessions.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().sessions.len()
    }

    pub fn subscribers(&self) -> Vec<Arc<StreamSession>> {
        self.subscribers.lock().sessions.values().cloned().collect()
    }

    /// Take every subscriber out and refuse new ones
    pub fn drain_subscribers(&self) -> Vec<Arc<StreamSession>> {
        let mut subs = self.subscribers.lock();
        subs.terminated = true;
        subs.sessions.drain().map(|(_, s)| s).collect()
    }
}

/// State moved into the poll task
struct PollTask {
    id: WatcherId,
    cursor: Option<FileCursor>,
    decoder: LineDecoder,
    options: WatcherOptions,
    subscribers: Arc<Mutex<Subscribers>>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<WatcherStats>,
}

impl PollTask {
    async fn run(mut self, on_exit: ExitHook) {
        let Some(mut cursor) = self.cursor.take() else {
            return;
        };
        let path = cursor.path().to_path_buf();
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut missing_since: Option<Instant> = None;
        let mut failing = false;
        let mut seen_truncations = 0;

        let permanent = loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::Relaxed) {
                break false;
            }

            let result = match read_blocking(cursor).await {
                Some((returned, result)) => {
                    cursor = returned;
                    result
                }
                None => break false,
            };

            match result {
                Ok(bytes) => {
                    if failing || missing_since.is_some() {
                        info!("{} readable again", path.display());
                    }
                    failing = false;
                    missing_since = None;

                    if cursor.truncations() != seen_truncations {
                        seen_truncations = cursor.truncations();
                        self.decoder.reset();
                        self.stats.set_truncations(seen_truncations);
                        info!("{} truncated, streaming from the start", path.display());
                    }
                    self.stats.set_offset(cursor.offset());

                    let lines: Vec<Arc<str>> = self
                        .decoder
                        .decode_lines(&bytes)
                        .into_iter()
                        .map(Arc::from)
                        .collect();
                    self.stats.add_lines(lines.len() as u64);
                    self.fan_out(&lines);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    self.stats.add_read_error();
                    if missing_since.is_none() {
                        // Whatever appears at the path next is a new file
                        cursor.rewind();
                    }
                    let since = *missing_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= self.options.missing_grace {
                        warn!("{}", StreamError::PermanentRead { path: path.clone() });
                        break true;
                    }
                    if !failing {
                        debug!("{} missing, waiting for it to reappear", path.display());
                        failing = true;
                    }
                }
                Err(e) => {
                    self.stats.add_read_error();
                    if !failing {
                        let err = StreamError::TransientRead {
                            path: path.clone(),
                            source: e,
                        };
                        warn!("{}, retrying", err);
                        failing = true;
                    }
                }
            }
        };

        if permanent {
            let sessions = {
                let mut subs = self.subscribers.lock();
                subs.terminated = true;
                subs.sessions.drain().map(|(_, s)| s).collect::<Vec<_>>()
            };
            for session in sessions {
                session.close(CloseReason::EndOfStream);
            }
            on_exit(self.id);
        }

        debug!("Stopped tailing {}", path.display());
    }

    /// Push lines to a snapshot of the subscribers, outside the lock
    fn fan_out(&self, lines: &[Arc<str>]) {
        let sessions: Vec<Arc<StreamSession>> =
            self.subscribers.lock().sessions.values().cloned().collect();

        for session in sessions {
            if lines.is_empty() {
                session.flush();
                continue;
            }
            for line in lines {
                session.push(line.clone());
            }
        }
    }
}

/// Run one cursor read on the blocking pool
async fn read_blocking(mut cursor: FileCursor) -> Option<(FileCursor, io::Result<Vec<u8>>)> {
    tokio::task::spawn_blocking(move || {
        let result = cursor.read_new_bytes();
        (cursor, result)
    })
    .await
    .ok()
}
