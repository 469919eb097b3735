// crates/core/src/fsutil.rs
//! Small filesystem and time helpers shared by the job engine.

use std::io;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Current UTC time as RFC3339 with a `Z` suffix, e.g.
/// `2026-08-05T12:30:45.123Z`.
pub fn utc_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn ensure_dir(path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)
}

/// Write `text` to `path` atomically: write a sibling `.tmp` file, then
/// rename over the destination. Readers never observe a partial file.
pub fn atomic_write_text(path: &Path, text: &str) -> io::Result<()> {
    let tmp = tmp_path(path);
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    atomic_write_text(path, &json)
}

fn tmp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
