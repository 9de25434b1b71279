//! Session transcripts.
//!
//! When a transcript directory is configured, every session appends its
//! input, output and exit to `{dir}/{session_id}.log`, one timestamped line
//! per event.

use chrono::{SecondsFormat, Utc};
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

use crate::sync::lock;

/// Thread-safe handle to an append-only transcript file.
pub type LogHandle = Arc<Mutex<Option<File>>>;

/// Current UTC time as RFC 3339 with milliseconds, e.g. `2026-02-04T10:15:30.123Z`.
fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Write a timestamped line to the transcript (if present).
pub fn log_line(handle: &LogHandle, direction: &str, data: &str) {
    let mut guard = lock(handle);
    if let Some(ref mut file) = *guard {
        let _ = writeln!(file, "[{}] {}: {}", utc_timestamp(), direction, data.escape_debug());
        let _ = file.flush();
    }
}

/// Open (or create) `{log_dir}/{log_id}.log` and return a shared handle.
///
/// Returns a handle to nothing when `log_dir` is `None` or the file cannot
/// be opened; logging through it is then a no-op.
pub fn open_log_file(log_dir: Option<&Path>, log_id: &str) -> LogHandle {
    let file = log_dir.and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            log::warn!("Cannot create transcript dir {}: {}", dir.display(), e);
            return None;
        }
        let path = dir.join(format!("{}.log", log_id));
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| log::warn!("Cannot open transcript {}: {}", path.display(), e))
            .ok()
    });
    Arc::new(Mutex::new(file))
}
