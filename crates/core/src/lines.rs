// crates/core/src/lines.rs
//! Incremental line splitting for raw process output.
//!
//! Deployment tools emit both `\n`-terminated lines and bare-`\r` progress
//! updates. The splitter yields a line on whichever terminator comes first
//! and keeps the unterminated remainder buffered for the next chunk.

use memchr::memchr2;

/// Accumulates raw output bytes and yields complete lines.
///
/// `\r\n` counts as a single terminator, even when the two bytes arrive in
/// different chunks. Invalid UTF-8 is replaced lossily per line.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
    last_was_cr: bool,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of raw output; returns every line completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        if !chunk.is_empty() {
            let mut data = chunk;
            if self.last_was_cr {
                if data[0] == b'\n' {
                    data = &data[1..];
                }
                self.last_was_cr = false;
            }
            self.pending.extend_from_slice(data);
        }

        let mut lines = Vec::new();
        while let Some(pos) = memchr2(b'\n', b'\r', &self.pending) {
            let line = String::from_utf8_lossy(&self.pending[..pos]).into_owned();
            let mut consumed = pos + 1;
            if self.pending[pos] == b'\r' {
                if consumed < self.pending.len() {
                    if self.pending[consumed] == b'\n' {
                        consumed += 1;
                    }
                } else {
                    // `\r` is the last byte seen; a following `\n` may arrive
                    // in the next chunk and must not produce an empty line.
                    self.last_was_cr = true;
                }
            }
            self.pending.drain(..consumed);
            lines.push(line);
        }
        lines
    }

    /// Drain the unterminated remainder, if any.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_on_cr_and_lf() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"one\rtwo\nthree");
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert!(splitter.has_pending());
        assert_eq!(splitter.flush(), Some("three".to_string()));
        assert_eq!(splitter.flush(), None);
    }

    #[test]
    fn crlf_is_one_terminator() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"alpha\r\nbeta\n");
        assert_eq!(lines, vec!["alpha".to_string(), "beta".to_string()]);
        assert!(!splitter.has_pending());
    }

    #[test]
    fn crlf_split_across_chunks() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push(b"alpha\r"), vec!["alpha".to_string()]);
        assert_eq!(splitter.push(b"\nbeta\n"), vec!["beta".to_string()]);
    }

    #[test]
    fn bare_cr_progress_lines() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"10%\r20%\r100%\n");
        assert_eq!(
            lines,
            vec!["10%".to_string(), "20%".to_string(), "100%".to_string()]
        );
    }

    #[test]
    fn partial_line_across_chunks() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"hel").is_empty());
        assert_eq!(splitter.push(b"lo\nwor"), vec!["hello".to_string()]);
        assert_eq!(splitter.flush(), Some("wor".to_string()));
    }

    #[test]
    fn empty_lines_preserved() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"a\n\nb\n");
        assert_eq!(
            lines,
            vec!["a".to_string(), String::new(), "b".to_string()]
        );
    }

    #[test]
    fn lossy_utf8() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"ok \xff\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok "));
    }
}
