//! Byte cursor over a growing file
//!
//! The file is reopened on every read. A file that was replaced under the
//! same path (different device/inode) or that shrank is read again from
//! offset 0, so nothing written to the new file is skipped.

use std::fs::{File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where a fresh cursor starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Only content appended after the cursor is created
    End,
    /// Whole current content, then appends
    Beginning,
}

/// Which file a path pointed at when last read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn identity_of(meta: &Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some(FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn identity_of(_meta: &Metadata) -> Option<FileIdentity> {
    None
}

/// Tracks how far into a file has been consumed
#[derive(Debug)]
pub struct FileCursor {
    path: PathBuf,
    offset: u64,
    identity: Option<FileIdentity>,
    truncations: u64,
    max_read_bytes: usize,
}

impl FileCursor {
    /// Create a cursor; a missing file starts at offset 0
    pub fn new(path: impl Into<PathBuf>, start: StartPosition, max_read_bytes: usize) -> Self {
        let path = path.into();
        let meta = std::fs::metadata(&path).ok();
        let offset = match (start, &meta) {
            (StartPosition::End, Some(meta)) => meta.len(),
            _ => 0,
        };

        Self {
            path,
            offset,
            identity: meta.as_ref().and_then(identity_of),
            truncations: 0,
            max_read_bytes: max_read_bytes.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of times reading restarted from offset 0 (shrink, replace or rewind)
    pub fn truncations(&self) -> u64 {
        self.truncations
    }

    /// Start over at offset 0 with whatever file next appears at the path
    ///
    /// Used once the file is found missing; a recreated file is then read
    /// from its first byte.
    pub fn rewind(&mut self) {
        self.offset = 0;
        self.identity = None;
        self.truncations += 1;
    }

    /// Read everything appended since the last call
    ///
    /// Returns an empty vector when the file has not grown. If the file is
    /// now shorter than the offset, the offset resets to 0 and the current
    /// content is returned by the next call. A different file at the same
    /// path is read from its start right away. At most `max_read_bytes` are
    /// returned at once; the rest follows on later calls.
    pub fn read_new_bytes(&mut self) -> io::Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        let meta = file.metadata()?;
        let size = meta.len();

        let identity = identity_of(&meta);
        if self.identity.is_some() && identity != self.identity {
            debug!("{} was replaced, reading from the start", self.path.display());
            self.offset = 0;
            self.truncations += 1;
        }
        self.identity = identity;

        if size < self.offset {
            debug!(
                "{} shrank from {} to {} bytes, rewinding",
                self.path.display(),
                self.offset,
                size
            );
            self.offset = 0;
            self.truncations += 1;
            return Ok(Vec::new());
        }

        if size == self.offset {
            return Ok(Vec::new());
        }

        let available = (size - self.offset).min(self.max_read_bytes as u64);
        file.seek(SeekFrom::Start(self.offset))?;

        let mut buf = Vec::with_capacity(available as usize);
        file.take(available).read_to_end(&mut buf)?;
        self.offset += buf.len() as u64;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tempfile::TempDir;

    fn log_in(dir: &TempDir) -> PathBuf {
        dir.path().join("app.log")
    }

    fn append(path: &Path, data: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    #[test]
    fn test_reads_appended_bytes_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_in(&dir);
        fs::write(&path, "old\n").unwrap();

        let mut cursor = FileCursor::new(&path, StartPosition::End, 1024);
        assert_eq!(cursor.offset(), 4);
        assert!(cursor.read_new_bytes().unwrap().is_empty());

        append(&path, "new\n");
        assert_eq!(cursor.read_new_bytes().unwrap(), b"new\n");
        assert_eq!(cursor.offset(), 8);
        assert!(cursor.read_new_bytes().unwrap().is_empty());
        assert_eq!(cursor.truncations(), 0);
    }

    #[test]
    fn test_beginning_replays_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_in(&dir);
        fs::write(&path, "one\ntwo\n").unwrap();

        let mut cursor = FileCursor::new(&path, StartPosition::Beginning, 1024);
        assert_eq!(cursor.read_new_bytes().unwrap(), b"one\ntwo\n");
    }

    #[test]
    fn test_truncation_resets_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_in(&dir);
        fs::write(&path, "").unwrap();

        let mut cursor = FileCursor::new(&path, StartPosition::End, 1024);
        append(&path, "first line\n");
        assert_eq!(cursor.read_new_bytes().unwrap(), b"first line\n");

        fs::write(&path, "x\n").unwrap();
        assert!(cursor.read_new_bytes().unwrap().is_empty());
        assert_eq!(cursor.offset(), 0);
        assert_eq!(cursor.truncations(), 1);

        assert_eq!(cursor.read_new_bytes().unwrap(), b"x\n");
        assert_eq!(cursor.offset(), 2);
    }

    #[test]
    fn test_large_growth_is_chunked() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_in(&dir);
        fs::write(&path, "").unwrap();

        let mut cursor = FileCursor::new(&path, StartPosition::End, 4);
        append(&path, "abcdefghij");

        assert_eq!(cursor.read_new_bytes().unwrap(), b"abcd");
        assert_eq!(cursor.read_new_bytes().unwrap(), b"efgh");
        assert_eq!(cursor.read_new_bytes().unwrap(), b"ij");
        assert!(cursor.read_new_bytes().unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_in(&dir);

        let mut cursor = FileCursor::new(&path, StartPosition::End, 1024);
        assert_eq!(cursor.offset(), 0);

        let err = cursor.read_new_bytes().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        append(&path, "late\n");
        assert_eq!(cursor.read_new_bytes().unwrap(), b"late\n");
    }

    #[test]
    fn test_rewind_reads_recreated_file_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_in(&dir);
        fs::write(&path, "0123456789\n").unwrap();

        let mut cursor = FileCursor::new(&path, StartPosition::End, 1024);
        assert_eq!(cursor.offset(), 11);

        fs::remove_file(&path).unwrap();
        assert_eq!(
            cursor.read_new_bytes().unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
        cursor.rewind();

        fs::write(&path, "hello world, new\n").unwrap();
        assert_eq!(cursor.read_new_bytes().unwrap(), b"hello world, new\n");
        assert_eq!(cursor.truncations(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_replaced_file_is_read_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_in(&dir);
        fs::write(&path, "0123456789\n").unwrap();

        let mut cursor = FileCursor::new(&path, StartPosition::End, 1024);

        // Swap in a longer file without the path ever going missing
        let staged = dir.path().join("app.log.new");
        fs::write(&staged, "hello world, new\n").unwrap();
        fs::rename(&staged, &path).unwrap();

        assert_eq!(cursor.read_new_bytes().unwrap(), b"hello world, new\n");
        assert_eq!(cursor.truncations(), 1);
        assert!(cursor.read_new_bytes().unwrap().is_empty());
    }
}
