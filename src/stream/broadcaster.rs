//! Registry of live watchers, keyed by file path
//!
//! One watcher per distinct path, however many sessions follow it. All
//! registry mutation happens under a single mutex, so concurrent
//! subscribes for the same path can never start two watchers.
//!
//! Lock order: registry, then a watcher's subscriber set, then a session.
//! Session detach hooks re-enter the registry, so they are only ever run
//! with none of those locks held.

use super::session::StreamSession;
use super::SessionId;
use crate::stream::stats::WatcherSnapshot;
use crate::stream::CloseReason;
use crate::tail::{TailWatcher, WatcherId, WatcherOptions};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Fans tailed lines out to every session following a path
#[derive(Clone)]
pub struct TailBroadcaster {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Mutex<Registry>,
    options: WatcherOptions,
    next_watcher_id: AtomicU64,
}

#[derive(Default)]
struct Registry {
    watchers: HashMap<PathBuf, TailWatcher>,
    session_paths: HashMap<SessionId, PathBuf>,
    shut_down: bool,
}

/// Serializable view of one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: SessionId,
    pub transport: &'static str,
    pub peer: String,
    pub connected_at: String,
    pub delivered: u64,
    pub buffered: usize,
    pub dropped: u64,
}

/// Serializable view of one watcher and its sessions
#[derive(Debug, Clone, Serialize)]
pub struct WatcherStatus {
    pub id: WatcherId,
    pub path: String,
    #[serde(flatten)]
    pub stats: WatcherSnapshot,
    pub sessions: Vec<SessionStatus>,
}

impl TailBroadcaster {
    pub fn new(options: WatcherOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                options,
                next_watcher_id: AtomicU64::new(1),
            }),
        }
    }

    /// Attach `session` to the watcher for `path`, starting one if needed
    ///
    /// Idempotent per session. A session already following another path is
    /// moved. After `shutdown` the session is closed with end-of-stream
    /// instead of being registered.
    pub fn subscribe(&self, path: impl AsRef<Path>, session: Arc<StreamSession>) {
        let path = path.as_ref();
        let id = session.id();

        {
            let mut reg = self.inner.registry.lock();
            if !reg.shut_down {
                if reg.session_paths.get(&id).map(PathBuf::as_path) == Some(path) {
                    return;
                }
                reg.detach_session(id);

                self.attach_locked(&mut reg, path, &session);
                reg.session_paths.insert(id, path.to_path_buf());

                let weak = Arc::downgrade(&self.inner);
                let installed = session.set_detach(Box::new(move |id| {
                    if let Some(inner) = weak.upgrade() {
                        TailBroadcaster { inner }.unsubscribe(id);
                    }
                }));
                if !installed {
                    // Closed while we were registering it
                    reg.detach_session(id);
                }

                debug!("Session {} subscribed to {}", id, path.display());
                return;
            }
        }

        session.close(CloseReason::EndOfStream);
    }

    /// Detach a session; stops and drops its watcher if it was the last one
    pub fn unsubscribe(&self, id: SessionId) {
        let mut reg = self.inner.registry.lock();
        if reg.detach_session(id) {
            debug!("Session {} unsubscribed", id);
        }
    }

    /// Number of live watchers
    pub fn watcher_count(&self) -> usize {
        self.inner.registry.lock().watchers.len()
    }

    /// Number of registered sessions
    pub fn session_count(&self) -> usize {
        self.inner.registry.lock().session_paths.len()
    }

    /// Whether a watcher exists for `path`
    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        self.inner
            .registry
            .lock()
            .watchers
            .contains_key(path.as_ref())
    }

    /// Snapshot for the status endpoint
    pub fn status(&self) -> Vec<WatcherStatus> {
        let reg = self.inner.registry.lock();
        let mut out: Vec<WatcherStatus> = reg
            .watchers
            .values()
            .map(|w| {
                let mut sessions: Vec<SessionStatus> = w
                    .subscribers()
                    .iter()
                    .map(|s| SessionStatus {
                        id: s.id(),
                        transport: s.transport(),
                        peer: s.peer().to_string(),
                        connected_at: s.connected_at().to_rfc3339(),
                        delivered: s.stats().delivered(),
                        buffered: s.buffered_len(),
                        dropped: s.stats().dropped(),
                    })
                    .collect();
                sessions.sort_by_key(|s| s.id);
                WatcherStatus {
                    id: w.id(),
                    path: w.path().display().to_string(),
                    stats: w.stats(),
                    sessions,
                }
            })
            .collect();
        out.sort_by_key(|w| w.id);
        out
    }

    /// Stop every watcher and end every session
    ///
    /// Later subscribes are refused.
    pub fn shutdown(&self) {
        let watchers: Vec<TailWatcher> = {
            let mut reg = self.inner.registry.lock();
            reg.shut_down = true;
            reg.session_paths.clear();
            reg.watchers.drain().map(|(_, w)| w).collect()
        };

        let mut closed = 0;
        for watcher in watchers {
            watcher.stop();
            for session in watcher.drain_subscribers() {
                session.close(CloseReason::EndOfStream);
                closed += 1;
            }
        }
        info!("Broadcaster shut down, {} session(s) ended", closed);
    }

    fn attach_locked(&self, reg: &mut Registry, path: &Path, session: &Arc<StreamSession>) {
        if let Some(watcher) = reg.watchers.get(path) {
            if watcher.add_subscriber(session.clone()) {
                return;
            }
            // Gave up on a vanished file; replace it below
            if let Some(stale) = reg.watchers.remove(path) {
                stale.stop();
            }
        }

        let id = self.inner.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        let mut watcher = TailWatcher::new(id, path, self.inner.options.clone());
        watcher.add_subscriber(session.clone());

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let key = path.to_path_buf();
        watcher.start(Box::new(move |exited| {
            if let Some(inner) = weak.upgrade() {
                inner.registry.lock().remove_watcher(&key, exited);
            }
        }));

        reg.watchers.insert(path.to_path_buf(), watcher);
    }
}

impl Registry {
    /// Remove a session's registration; returns whether it was registered
    fn detach_session(&mut self, id: SessionId) -> bool {
        let Some(path) = self.session_paths.remove(&id) else {
            return false;
        };

        let now_empty = self
            .watchers
            .get(&path)
            .map(|w| w.remove_subscriber(id))
            .unwrap_or(false);
        if now_empty {
            if let Some(watcher) = self.watchers.remove(&path) {
                watcher.stop();
                info!("Stopped tailing {} (no subscribers)", path.display());
            }
        }
        true
    }

    /// Drop the watcher for `path`, but only if it is still watcher `id`
    fn remove_watcher(&mut self, path: &Path, id: WatcherId) {
        if self.watchers.get(path).map(TailWatcher::id) == Some(id) {
            self.watchers.remove(path);
            self.session_paths.retain(|_, p| p.as_path() != path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::session::tests::MockEmitter;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    fn temp_log(name: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        (dir, path)
    }

    fn append(path: &Path, data: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    fn fast_broadcaster() -> TailBroadcaster {
        TailBroadcaster::new(WatcherOptions {
            poll_interval: Duration::from_millis(10),
            missing_grace: Duration::from_millis(60),
            ..WatcherOptions::default()
        })
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn test_concrete_scenario() {
        let (_dir, path) = temp_log("scenario.log");
        fs::write(&path, "").unwrap();

        let broadcaster = fast_broadcaster();
        let mock = MockEmitter::with_capacity(100);
        let session = StreamSession::new(mock.clone(), 16, "test", "client");
        broadcaster.subscribe(&path, session.clone());

        append(&path, "a\n");
        assert!(wait_for(|| mock.lines() == vec!["a"]).await);

        append(&path, "b\nc\n");
        assert!(wait_for(|| mock.lines().len() == 3).await);
        assert_eq!(mock.lines(), vec!["a", "b", "c"]);

        session.on_client_disconnect();
        assert_eq!(broadcaster.watcher_count(), 0);
        assert!(!broadcaster.is_watching(&path));
    }

    #[tokio::test]
    async fn test_two_sessions_share_one_watcher() {
        let (_dir, path) = temp_log("shared.log");
        fs::write(&path, "").unwrap();

        let broadcaster = fast_broadcaster();
        let a = StreamSession::new(MockEmitter::with_capacity(10), 4, "test", "a");
        let b = StreamSession::new(MockEmitter::with_capacity(10), 4, "test", "b");

        broadcaster.subscribe(&path, a.clone());
        broadcaster.subscribe(&path, b.clone());
        broadcaster.subscribe(&path, a.clone());

        assert_eq!(broadcaster.watcher_count(), 1);
        assert_eq!(broadcaster.session_count(), 2);

        broadcaster.unsubscribe(a.id());
        assert_eq!(broadcaster.watcher_count(), 1);

        broadcaster.unsubscribe(b.id());
        assert_eq!(broadcaster.watcher_count(), 0);
        assert_eq!(broadcaster.session_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_subscribes_create_one_watcher() {
        let (_dir, path) = temp_log("race.log");
        fs::write(&path, "").unwrap();

        let broadcaster = fast_broadcaster();
        let mut handles = Vec::new();
        for i in 0..16 {
            let broadcaster = broadcaster.clone();
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                let session =
                    StreamSession::new(MockEmitter::with_capacity(10), 4, "test", format!("{i}"));
                broadcaster.subscribe(&path, session.clone());
                session
            }));
        }

        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }

        assert_eq!(broadcaster.watcher_count(), 1);
        assert_eq!(broadcaster.session_count(), 16);

        for session in sessions {
            session.close(CloseReason::Disconnected);
        }
        assert_eq!(broadcaster.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_session_drops_only_its_own_lines() {
        let (_dir, path) = temp_log("slow.log");
        fs::write(&path, "").unwrap();

        let broadcaster = fast_broadcaster();
        let fast = MockEmitter::with_capacity(100);
        let slow = MockEmitter::with_capacity(0);
        broadcaster.subscribe(&path, StreamSession::new(fast.clone(), 16, "test", "fast"));
        let slow_session = StreamSession::new(slow.clone(), 2, "test", "slow");
        broadcaster.subscribe(&path, slow_session.clone());

        append(&path, "1\n2\n3\n4\n5\n");
        assert!(wait_for(|| fast.lines().len() == 5).await);

        assert_eq!(fast.lines(), vec!["1", "2", "3", "4", "5"]);
        assert_eq!(slow_session.stats().dropped(), 3);

        slow.make_room(10);
        assert!(wait_for(|| slow.lines().len() == 2).await);
        assert_eq!(slow.lines(), vec!["4", "5"]);

        broadcaster.shutdown();
    }

    #[tokio::test]
    async fn test_session_moves_between_paths() {
        let (_first_dir, first) = temp_log("first.log");
        let (_second_dir, second) = temp_log("second.log");
        fs::write(&first, "").unwrap();
        fs::write(&second, "").unwrap();

        let broadcaster = fast_broadcaster();
        let session = StreamSession::new(MockEmitter::with_capacity(10), 4, "test", "m");

        broadcaster.subscribe(&first, session.clone());
        broadcaster.subscribe(&second, session.clone());

        assert!(!broadcaster.is_watching(&first));
        assert!(broadcaster.is_watching(&second));
        assert_eq!(broadcaster.session_count(), 1);

        broadcaster.shutdown();
    }

    #[tokio::test]
    async fn test_vanished_file_removes_watcher() {
        let (_dir, path) = temp_log("vanish.log");
        fs::write(&path, "").unwrap();

        let broadcaster = fast_broadcaster();
        let mock = MockEmitter::with_capacity(10);
        let session = StreamSession::new(mock.clone(), 4, "test", "v");
        broadcaster.subscribe(&path, session.clone());

        fs::remove_file(&path).unwrap();

        assert!(wait_for(|| broadcaster.watcher_count() == 0).await);
        assert!(session.is_closed());
        assert_eq!(*mock.closed.lock(), Some(CloseReason::EndOfStream));
        assert_eq!(broadcaster.session_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_sessions_and_refuses_new_ones() {
        let (_dir, path) = temp_log("shutdown.log");
        fs::write(&path, "").unwrap();

        let broadcaster = fast_broadcaster();
        let mock = MockEmitter::with_capacity(10);
        let session = StreamSession::new(mock.clone(), 4, "test", "s");
        broadcaster.subscribe(&path, session.clone());

        broadcaster.shutdown();
        assert!(session.is_closed());
        assert_eq!(*mock.closed.lock(), Some(CloseReason::EndOfStream));
        assert_eq!(broadcaster.watcher_count(), 0);

        let late_mock = MockEmitter::with_capacity(10);
        let late = StreamSession::new(late_mock.clone(), 4, "test", "late");
        broadcaster.subscribe(&path, late.clone());
        assert!(late.is_closed());
        assert_eq!(broadcaster.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_status_reports_sessions() {
        let (_dir, path) = temp_log("status.log");
        fs::write(&path, "").unwrap();

        let broadcaster = fast_broadcaster();
        let session = StreamSession::new(MockEmitter::with_capacity(10), 4, "sse", "1.2.3.4:5");
        broadcaster.subscribe(&path, session.clone());

        let status = broadcaster.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].sessions.len(), 1);
        assert_eq!(status[0].sessions[0].transport, "sse");
        assert_eq!(status[0].sessions[0].peer, "1.2.3.4:5");

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"lines_read\""));
        assert!(json.contains("\"connected_at\""));

        broadcaster.shutdown();
    }
}
