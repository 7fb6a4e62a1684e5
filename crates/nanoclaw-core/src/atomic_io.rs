use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::time_utils::current_unix_timestamp_ms;

/// Writes text using a temp file + rename so readers never observe partial data.
///
/// Every file on the IPC surface crosses a host/container boundary; the peer
/// polls and must never see a half-written JSON body.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.exists() && path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }

    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("ipc-event"),
        std::process::id(),
        current_unix_timestamp_ms()
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content)
        .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to rename temporary file {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

/// Serializes a value to JSON and writes it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    write_text_atomic(path, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "body").expect_err("dir should fail");
        assert!(error.to_string().contains("is a directory"));
    }

    #[test]
    fn unit_write_json_atomic_round_trips_value() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("value.json");
        write_json_atomic(&path, &serde_json::json!({"seq": 7})).expect("write");
        let raw = std::fs::read_to_string(&path).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("parse");
        assert_eq!(value["seq"], 7);
    }

    #[test]
    fn regression_write_text_atomic_creates_missing_parent_dirs() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested/deeper/event.json");
        write_text_atomic(&path, "{}").expect("write");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "{}");
    }
}
