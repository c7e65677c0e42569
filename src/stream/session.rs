//! One client's live log stream
//!
//! The session sits between the watcher's fan-out and a transport:
//! - forwards lines to its [`Emitter`] without ever blocking the fan-out
//! - buffers lines in a bounded queue while the transport is full
//! - drops the oldest buffered line when that queue overflows
//! - closes itself (and only itself) when the transport is gone
//!
//! Lifecycle is `OPEN -> CLOSED`; once closed every call is a no-op.

use super::emitter::{CloseReason, EmitError, Emitter};
use super::stats::SessionStats;
use super::SessionId;
use crate::error::StreamError;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Called once when a session closes, to unregister it
pub(crate) type DetachHook = Box<dyn FnOnce(SessionId) + Send>;

/// Live stream for a single client
pub struct StreamSession {
    id: SessionId,
    /// Transport label ("sse", "websocket", ...)
    transport: &'static str,
    /// Remote address, for logs and status
    peer: String,
    connected_at: DateTime<Local>,
    emitter: Box<dyn Emitter>,
    state: Mutex<SessionState>,
    detach: Mutex<Option<DetachHook>>,
    stats: SessionStats,
}

struct SessionState {
    buffered: VecDeque<Arc<str>>,
    capacity: usize,
    closed: bool,
}

/// Outcome of trying to drain the buffer into the transport
enum Drain {
    /// Buffer is empty
    Empty,
    /// Transport full, some lines still buffered
    Blocked,
    /// Transport gone
    Failed,
}

impl StreamSession {
    /// Create an open session that buffers up to `buffer_lines` lines
    pub fn new(
        emitter: impl Emitter,
        buffer_lines: usize,
        transport: &'static str,
        peer: impl Into<String>,
    ) -> Arc<Self> {
        let capacity = buffer_lines.max(1);
        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            transport,
            peer: peer.into(),
            connected_at: Local::now(),
            emitter: Box::new(emitter),
            state: Mutex::new(SessionState {
                buffered: VecDeque::with_capacity(capacity.min(64)),
                capacity,
                closed: false,
            }),
            detach: Mutex::new(None),
            stats: SessionStats::new(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn transport(&self) -> &'static str {
        self.transport
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn connected_at(&self) -> DateTime<Local> {
        self.connected_at
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Lines waiting for transport space
    pub fn buffered_len(&self) -> usize {
        self.state.lock().buffered.len()
    }

    /// Forward one line, buffering or dropping instead of blocking
    pub fn push(&self, line: Arc<str>) {
        let failed = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }

            match self.drain(&mut state) {
                Drain::Failed => true,
                Drain::Blocked => {
                    self.enqueue(&mut state, line);
                    false
                }
                Drain::Empty => match self.emitter.try_send(line.clone()) {
                    Ok(()) => {
                        self.stats.add_delivered(1);
                        false
                    }
                    Err(EmitError::Full) => {
                        self.enqueue(&mut state, line);
                        false
                    }
                    Err(EmitError::Closed) => true,
                },
            }
        };

        if failed {
            self.fail();
        }
    }

    /// Move buffered lines into the transport as space allows
    pub fn flush(&self) {
        let failed = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            matches!(self.drain(&mut state), Drain::Failed)
        };

        if failed {
            self.fail();
        }
    }

    /// Client went away; called by the transport
    pub fn on_client_disconnect(&self) {
        self.close(CloseReason::Disconnected);
    }

    /// Close the session and release its transport
    ///
    /// Idempotent. A graceful close first hands as many buffered lines to
    /// the transport as it will take.
    pub fn close(&self, reason: CloseReason) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            if reason == CloseReason::EndOfStream {
                let _ = self.drain(&mut state);
            }
            state.closed = true;
            state.buffered.clear();
        }

        self.emitter.close(reason);
        debug!(
            "Session {} ({} {}) closed: {:?}",
            self.id, self.transport, self.peer, reason
        );

        let hook = self.detach.lock().take();
        if let Some(hook) = hook {
            hook(self.id);
        }
    }

    /// Install the unregister hook
    ///
    /// Returns `false` (and keeps no hook) if the session already closed,
    /// in which case the caller must unregister it itself.
    pub(crate) fn set_detach(&self, hook: DetachHook) -> bool {
        *self.detach.lock() = Some(hook);
        if self.is_closed() {
            self.detach.lock().take();
            return false;
        }
        true
    }

    fn fail(&self) {
        let err = StreamError::TransportWrite { session: self.id };
        debug!("{}", err);
        self.close(CloseReason::WriteFailed);
    }

    fn drain(&self, state: &mut SessionState) -> Drain {
        while let Some(front) = state.buffered.front() {
            match self.emitter.try_send(front.clone()) {
                Ok(()) => {
                    state.buffered.pop_front();
                    self.stats.add_delivered(1);
                }
                Err(EmitError::Full) => return Drain::Blocked,
                Err(EmitError::Closed) => return Drain::Failed,
            }
        }
        Drain::Empty
    }

    fn enqueue(&self, state: &mut SessionState, line: Arc<str>) {
        if state.buffered.len() >= state.capacity {
            state.buffered.pop_front();
            self.stats.add_dropped(1);
            trace!("Session {} buffer full, dropped oldest line", self.id);
        }
        state.buffered.push_back(line);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    /// Emitter with a fixed outbound capacity that records what it accepted
    #[derive(Clone, Default)]
    pub(crate) struct MockEmitter {
        pub sent: Arc<Mutex<Vec<String>>>,
        pub capacity: Arc<Mutex<usize>>,
        pub closed: Arc<Mutex<Option<CloseReason>>>,
        pub refuse: Arc<AtomicBool>,
    }

    impl MockEmitter {
        pub fn with_capacity(capacity: usize) -> Self {
            let mock = Self::default();
            *mock.capacity.lock() = capacity;
            mock
        }

        /// Simulate the client reading `n` lines
        pub fn make_room(&self, n: usize) {
            *self.capacity.lock() += n;
        }

        pub fn lines(&self) -> Vec<String> {
            self.sent.lock().clone()
        }
    }

    impl Emitter for MockEmitter {
        fn try_send(&self, line: Arc<str>) -> Result<(), EmitError> {
            if self.refuse.load(Ordering::SeqCst) || self.closed.lock().is_some() {
                return Err(EmitError::Closed);
            }
            let mut capacity = self.capacity.lock();
            if *capacity == 0 {
                return Err(EmitError::Full);
            }
            *capacity -= 1;
            self.sent.lock().push(line.to_string());
            Ok(())
        }

        fn close(&self, reason: CloseReason) {
            *self.closed.lock() = Some(reason);
        }
    }

    #[test]
    fn test_push_forwards_in_order() {
        let mock = MockEmitter::with_capacity(10);
        let session = StreamSession::new(mock.clone(), 4, "test", "peer");

        session.push("a".into());
        session.push("b".into());

        assert_eq!(mock.lines(), vec!["a", "b"]);
        assert_eq!(session.stats().delivered(), 2);
        assert_eq!(session.buffered_len(), 0);
    }

    #[test]
    fn test_full_transport_buffers_then_flushes() {
        let mock = MockEmitter::with_capacity(1);
        let session = StreamSession::new(mock.clone(), 4, "test", "peer");

        session.push("1".into());
        session.push("2".into());
        session.push("3".into());
        assert_eq!(mock.lines(), vec!["1"]);
        assert_eq!(session.buffered_len(), 2);

        mock.make_room(5);
        session.flush();
        assert_eq!(mock.lines(), vec!["1", "2", "3"]);
        assert_eq!(session.buffered_len(), 0);
    }

    #[test]
    fn test_buffered_lines_keep_order_ahead_of_new_lines() {
        let mock = MockEmitter::with_capacity(0);
        let session = StreamSession::new(mock.clone(), 4, "test", "peer");

        session.push("1".into());
        session.push("2".into());
        mock.make_room(3);
        session.push("3".into());

        assert_eq!(mock.lines(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mock = MockEmitter::with_capacity(0);
        let session = StreamSession::new(mock.clone(), 2, "test", "peer");

        for line in ["1", "2", "3", "4"] {
            session.push(line.into());
        }
        assert_eq!(session.buffered_len(), 2);
        assert_eq!(session.stats().dropped(), 2);

        mock.make_room(10);
        session.flush();
        assert_eq!(mock.lines(), vec!["3", "4"]);
    }

    #[test]
    fn test_closed_transport_closes_session_and_detaches() {
        let mock = MockEmitter::with_capacity(10);
        let session = StreamSession::new(mock.clone(), 4, "test", "peer");

        let detached = Arc::new(Mutex::new(None));
        let detached_clone = detached.clone();
        assert!(session.set_detach(Box::new(move |id| {
            *detached_clone.lock() = Some(id);
        })));

        mock.refuse.store(true, Ordering::SeqCst);
        session.push("lost".into());

        assert!(session.is_closed());
        assert_eq!(*mock.closed.lock(), Some(CloseReason::WriteFailed));
        assert_eq!(*detached.lock(), Some(session.id()));
    }

    #[test]
    fn test_push_after_close_is_noop() {
        let mock = MockEmitter::with_capacity(10);
        let session = StreamSession::new(mock.clone(), 4, "test", "peer");

        session.on_client_disconnect();
        session.push("ignored".into());
        session.close(CloseReason::EndOfStream);

        assert!(mock.lines().is_empty());
        assert_eq!(*mock.closed.lock(), Some(CloseReason::Disconnected));
    }

    #[test]
    fn test_graceful_close_drains_buffer_first() {
        let mock = MockEmitter::with_capacity(0);
        let session = StreamSession::new(mock.clone(), 4, "test", "peer");

        session.push("tail".into());
        mock.make_room(1);
        session.close(CloseReason::EndOfStream);

        assert_eq!(mock.lines(), vec!["tail"]);
        assert_eq!(*mock.closed.lock(), Some(CloseReason::EndOfStream));
    }

    #[test]
    fn test_set_detach_on_closed_session_is_refused() {
        let session = StreamSession::new(MockEmitter::with_capacity(1), 4, "test", "peer");
        session.close(CloseReason::Disconnected);

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        let accepted = session.set_detach(Box::new(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        }));

        assert!(!accepted);
        assert!(!called.load(Ordering::SeqCst));
    }

    proptest::proptest! {
        #[test]
        fn prop_lines_arrive_in_push_order(
            steps in proptest::collection::vec((0usize..3, proptest::bool::ANY), 1..60),
        ) {
            let mock = MockEmitter::with_capacity(0);
            let session = StreamSession::new(mock.clone(), 1024, "test", "peer");

            let mut pushed = Vec::new();
            for (i, (room, flush)) in steps.iter().enumerate() {
                mock.make_room(*room);
                if *flush {
                    session.flush();
                }
                let line = i.to_string();
                session.push(line.as_str().into());
                pushed.push(line);
            }
            mock.make_room(pushed.len());
            session.flush();

            proptest::prop_assert_eq!(mock.lines(), pushed);
            proptest::prop_assert_eq!(session.stats().dropped(), 0);
        }
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = StreamSession::new(MockEmitter::default(), 1, "test", "a");
        let b = StreamSession::new(MockEmitter::default(), 1, "test", "b");
        assert_ne!(a.id(), b.id());
    }
}
