//! Stream counters
//!
//! Thread-safe counters read by the status endpoint.
//! Uses lock-free atomics for all operations.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-session delivery counters
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Lines accepted by the transport
    delivered: AtomicU64,
    /// Lines lost to buffer overflow
    dropped: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_delivered(&self, lines: u64) {
        self.delivered.fetch_add(lines, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_dropped(&self, lines: u64) {
        self.dropped.fetch_add(lines, Ordering::Relaxed);
    }

    #[inline]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Per-watcher read counters, written by the poll task only
#[derive(Debug, Default)]
pub struct WatcherStats {
    offset: AtomicU64,
    lines_read: AtomicU64,
    truncations: AtomicU64,
    read_errors: AtomicU64,
}

/// Point-in-time copy of [`WatcherStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatcherSnapshot {
    pub offset: u64,
    pub lines_read: u64,
    pub truncations: u64,
    pub read_errors: u64,
}

impl WatcherStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_truncations(&self, truncations: u64) {
        self.truncations.store(truncations, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_lines(&self, lines: u64) {
        self.lines_read.fetch_add(lines, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WatcherSnapshot {
        WatcherSnapshot {
            offset: self.offset.load(Ordering::Relaxed),
            lines_read: self.lines_read.load(Ordering::Relaxed),
            truncations: self.truncations.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counters() {
        let stats = SessionStats::new();
        stats.add_delivered(3);
        stats.add_dropped(1);
        stats.add_delivered(2);

        assert_eq!(stats.delivered(), 5);
        assert_eq!(stats.dropped(), 1);
    }

    #[test]
    fn test_watcher_snapshot() {
        let stats = WatcherStats::new();
        stats.set_offset(42);
        stats.add_lines(4);
        stats.set_truncations(1);
        stats.add_read_error();

        assert_eq!(
            stats.snapshot(),
            WatcherSnapshot {
                offset: 42,
                lines_read: 4,
                truncations: 1,
                read_errors: 1,
            }
        );
    }
}
