//! File tailing
//!
//! - `cursor` - byte offset into one file, truncation aware
//! - `decoder` - turns raw chunks into complete lines
//! - `watcher` - poll task that feeds lines to subscribed sessions

pub mod cursor;
pub mod decoder;
pub mod watcher;

pub use cursor::{FileCursor, StartPosition};
pub use decoder::LineDecoder;
pub use watcher::{ExitHook, TailWatcher, WatcherId, WatcherOptions};
