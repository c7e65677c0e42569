//! Transport handle abstraction
//!
//! A session never writes to a socket directly. It hands lines to an
//! [`Emitter`], which must never block. Transports that own a real socket
//! use [`ChannelEmitter`]: a bounded mpsc channel drained by a
//! per-connection writer task holding the matching [`EmitterStream`].

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Why a stream is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Graceful end, the client is told the stream is over
    EndOfStream,
    /// Client went away
    Disconnected,
    /// Transport refused a write
    WriteFailed,
}

/// Non-blocking send failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitError {
    /// Outbound buffer full, try again later
    Full,
    /// Transport is gone for good
    Closed,
}

/// Non-blocking outbound handle for one client
pub trait Emitter: Send + Sync + 'static {
    /// Queue one line for the client without waiting
    fn try_send(&self, line: Arc<str>) -> Result<(), EmitError>;

    /// Release the transport; lines already queued are still delivered
    fn close(&self, reason: CloseReason);
}

/// Emitter side of a bounded line channel
pub struct ChannelEmitter {
    tx: Mutex<Option<mpsc::Sender<Arc<str>>>>,
    graceful: Arc<AtomicBool>,
}

/// Writer-task side of a bounded line channel
pub struct EmitterStream {
    rx: mpsc::Receiver<Arc<str>>,
    graceful: Arc<AtomicBool>,
}

/// Create a connected emitter/stream pair with `capacity` queued lines
pub fn channel(capacity: usize) -> (ChannelEmitter, EmitterStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let graceful = Arc::new(AtomicBool::new(false));

    (
        ChannelEmitter {
            tx: Mutex::new(Some(tx)),
            graceful: graceful.clone(),
        },
        EmitterStream { rx, graceful },
    )
}

impl Emitter for ChannelEmitter {
    fn try_send(&self, line: Arc<str>) -> Result<(), EmitError> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(EmitError::Closed);
        };
        match tx.try_send(line) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EmitError::Full),
            Err(TrySendError::Closed(_)) => Err(EmitError::Closed),
        }
    }

    fn close(&self, reason: CloseReason) {
        if reason == CloseReason::EndOfStream {
            self.graceful.store(true, Ordering::SeqCst);
        }
        // Dropping the sender lets the writer drain what is queued, then see None
        self.tx.lock().take();
    }
}

impl EmitterStream {
    /// Next queued line, `None` once the emitter is closed and drained
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }

    /// Whether the emitter was closed with `EndOfStream`
    pub fn ended_gracefully(&self) -> bool {
        self.graceful.load(Ordering::SeqCst)
    }
}
