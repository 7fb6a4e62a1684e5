use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

/// Builds a `<ts>-<seq>.json` file name whose lexicographic order equals
/// `(ts, seq)` order. Both components are zero-padded: millisecond
/// timestamps to 13 digits (good through year 2286) and sequences to 6.
pub fn sortable_event_file_name(ts_ms: u64, seq: u64) -> String {
    format!("{ts_ms:013}-{seq:06}.json")
}

/// Parses a `<ts>-<seq>.json` name back into its components.
///
/// Returns `None` for names that do not follow the scheme; pollers use
/// this to skip foreign files dropped into an event directory.
pub fn parse_event_file_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_suffix(".json")?;
    let (ts_raw, seq_raw) = stem.split_once('-')?;
    let ts = ts_raw.parse::<u64>().ok()?;
    let seq = seq_raw.parse::<u64>().ok()?;
    Some((ts, seq))
}

/// Appends one serialized record plus newline to a JSONL event log.
pub fn append_jsonl_line<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let line = serde_json::to_string(record)
        .with_context(|| format!("failed to serialize event for {}", path.display()))?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open event log {}", path.display()))?;
    writeln!(file, "{line}")
        .with_context(|| format!("failed to append event log {}", path.display()))?;
    Ok(())
}
