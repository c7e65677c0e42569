//! Live streams of tailed lines
//!
//! - `emitter` - non-blocking transport handle (`Emitter` trait + channel impl)
//! - `session` - one client's stream with bounded oldest-drop buffering
//! - `broadcaster` - path-keyed registry of watchers and their sessions
//! - `stats` - lock-free counters for the status endpoint

pub mod broadcaster;
pub mod emitter;
pub mod session;
pub mod stats;

pub use broadcaster::{SessionStatus, TailBroadcaster, WatcherStatus};
pub use emitter::{channel, ChannelEmitter, CloseReason, EmitError, Emitter, EmitterStream};
pub use session::StreamSession;

/// Opaque session identifier, unique for the process lifetime
pub type SessionId = u64;
