//! Live log file streaming over Server-Sent Events and WebSocket
//!
//! ```text
//! log file ──poll──► TailWatcher ──lines──► StreamSession ──► Emitter ──► client
//!                         ▲                      │
//!                         └── TailBroadcaster ◄──┘ (detach on close)
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod server;
pub mod stream;
pub mod tail;

pub use error::{Result, StreamError};
