// crates/core/src/tail.rs
//! Offset-tracking follower for append-only log files.

use std::io;
use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Follows an append-only file, returning only the bytes added since the
/// previous read. The file may not exist yet; that is not an error.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    offset: u64,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    /// Move the cursor to the current end of file, skipping history.
    /// A missing file leaves the cursor at zero.
    pub async fn skip_to_end(&mut self) {
        if let Ok(meta) = tokio::fs::metadata(&self.path).await {
            self.offset = meta.len();
        }
    }

    /// Read everything appended since the last call. Returns an empty vec
    /// when the file is missing or has not grown. A shrunken file resets
    /// the cursor to the new length.
    pub async fn read_new(&mut self) -> io::Result<Vec<u8>> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let len = file.metadata().await?.len();
        if len <= self.offset {
            if len < self.offset {
                tracing::debug!(path = %self.path.display(), "log file shrank; resetting tail offset");
                self.offset = len;
            }
            return Ok(Vec::new());
        }

        file.seek(io::SeekFrom::Start(self.offset)).await?;
        let mut buf = vec![0u8; (len - self.offset) as usize];
        file.read_exact(&mut buf).await?;
        self.offset = len;
        Ok(buf)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}
