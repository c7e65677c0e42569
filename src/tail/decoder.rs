//! Line splitting for tailed bytes
//!
//! Bytes arrive in arbitrary chunks; only lines whose terminator has been
//! seen are released. A trailing `\r` is stripped so CRLF logs stream
//! cleanly, and invalid UTF-8 is replaced rather than rejected.

/// Incremental `\n` splitter
#[derive(Debug)]
pub struct LineDecoder {
    pending: Vec<u8>,
    max_line_bytes: usize,
}

impl LineDecoder {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// Feed a chunk, calling `emit` for every completed line
    pub fn decode<F: FnMut(String)>(&mut self, data: &[u8], mut emit: F) {
        for &byte in data {
            if byte == b'\n' {
                emit(Self::finish(&mut self.pending));
            } else {
                if self.pending.len() >= self.max_line_bytes {
                    emit(Self::finish(&mut self.pending));
                }
                self.pending.push(byte);
            }
        }
    }

    /// Convenience wrapper collecting the completed lines
    pub fn decode_lines(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        self.decode(data, |line| lines.push(line));
        lines
    }

    /// Bytes held back waiting for a terminator
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop the partial line (the file was truncated under it)
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    fn finish(pending: &mut Vec<u8>) -> String {
        if pending.last() == Some(&b'\r') {
            pending.pop();
        }
        let line = String::from_utf8_lossy(pending).into_owned();
        pending.clear();
        line
    }
}
