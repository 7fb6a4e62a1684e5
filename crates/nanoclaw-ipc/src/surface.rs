use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use nanoclaw_core::{
    current_unix_timestamp_ms, parse_event_file_name, sortable_event_file_name, write_json_atomic,
    write_text_atomic,
};

use crate::events::{
    InputMessage, ProgressFileEvent, SteerAckFile, SteerFile, CLOSE_SENTINEL_FILE, INPUT_DIR,
    PROGRESS_DIR, STEER_ACK_SUFFIX, STEER_DIR,
};

/// Handle on one group's IPC directory tree. Both the host half (write
/// input/steer, read progress/acks) and the container half (drain input,
/// write progress, consume steer) live here; each process only calls the
/// methods for its side of the boundary.
#[derive(Debug, Clone)]
pub struct GroupIpc {
    group_root: PathBuf,
    write_seq: Arc<AtomicU64>,
}

impl GroupIpc {
    pub fn new(ipc_root: &Path, group: &str) -> Self {
        Self {
            group_root: ipc_root.join(group),
            write_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn group_root(&self) -> &Path {
        &self.group_root
    }

    fn input_dir(&self) -> PathBuf {
        self.group_root.join(INPUT_DIR)
    }

    fn progress_dir(&self, run_id: &str) -> PathBuf {
        self.group_root.join(PROGRESS_DIR).join(run_id)
    }

    fn steer_path(&self, run_id: &str) -> PathBuf {
        self.group_root.join(STEER_DIR).join(format!("{run_id}.json"))
    }

    fn steer_ack_path(&self, run_id: &str) -> PathBuf {
        self.group_root
            .join(STEER_DIR)
            .join(format!("{run_id}{STEER_ACK_SUFFIX}"))
    }

    fn close_sentinel_path(&self) -> PathBuf {
        self.input_dir().join(CLOSE_SENTINEL_FILE)
    }

    // ---- host side ----

    /// Writes one message file into `input/`. File names sort in submission
    /// order, which is the order the agent consumes them in.
    pub fn write_input_message(&self, text: &str) -> Result<PathBuf> {
        let seq = self.write_seq.fetch_add(1, Ordering::SeqCst);
        let name = sortable_event_file_name(current_unix_timestamp_ms(), seq);
        let path = self.input_dir().join(name);
        write_json_atomic(
            &path,
            &InputMessage::Message {
                text: text.to_string(),
            },
        )?;
        Ok(path)
    }

    /// Drops the `_close` sentinel: "drain the current turn and exit".
    pub fn write_close_sentinel(&self) -> Result<()> {
        write_text_atomic(&self.close_sentinel_path(), "")
    }

    /// Writes the steer file for a run. One steer file per run may be
    /// outstanding at a time; the previous one must be consumed first.
    pub fn write_steer(&self, steer: &SteerFile) -> Result<()> {
        write_json_atomic(&self.steer_path(&steer.run_id), steer)
    }

    /// Consumes the steer ack sentinel for a run if the agent has written
    /// one, unlinking it.
    pub fn take_steer_ack(&self, run_id: &str) -> Result<Option<SteerAckFile>> {
        let path = self.steer_ack_path(run_id);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read steer ack {}", path.display()))
            }
        };
        let ack: SteerAckFile = serde_json::from_str(&raw)
            .with_context(|| format!("invalid steer ack {}", path.display()))?;
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to unlink steer ack {}", path.display()))?;
        Ok(Some(ack))
    }

    /// Returns progress events for a run with `(ts, seq)` strictly greater
    /// than `after`, in order. Files remain in place; the host tracks its
    /// own read watermark.
    pub fn read_progress_after(
        &self,
        run_id: &str,
        after: (u64, u64),
    ) -> Result<Vec<ProgressFileEvent>> {
        let dir = self.progress_dir(run_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read progress dir {}", dir.display()))
            }
        };

        let mut keyed = Vec::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to enumerate progress dir {}", dir.display()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(key) = parse_event_file_name(name) else {
                continue;
            };
            if key <= after {
                continue;
            }
            let raw = match std::fs::read_to_string(entry.path()) {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            let Ok(event) = serde_json::from_str::<ProgressFileEvent>(&raw) else {
                continue;
            };
            keyed.push((key, event));
        }
        keyed.sort_by_key(|(key, _)| *key);
        Ok(keyed.into_iter().map(|(_, event)| event).collect())
    }

    /// Removes an unconsumed steer file after its run ended. The event is
    /// marked expired in the store rather than acked, so no ack sentinel
    /// is written here.
    pub fn remove_steer(&self, run_id: &str) -> Result<bool> {
        match std::fs::remove_file(self.steer_path(run_id)) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error).context("failed to remove expired steer file"),
        }
    }

    /// Removes a stale `_close` sentinel left behind by a prior run.
    /// Invoked unconditionally at container start.
    pub fn clear_stale_close_sentinel(&self) -> Result<bool> {
        match std::fs::remove_file(self.close_sentinel_path()) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error).context("failed to remove stale close sentinel"),
        }
    }

    // ---- container side ----

    /// Drains pending input message files in lexicographic (submission)
    /// order. Each file is unlinked before its message is surfaced, so a
    /// message is injected at most once even across crashes.
    pub fn drain_input(&self) -> Result<Vec<InputMessage>> {
        let dir = self.input_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read input dir {}", dir.display()))
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to enumerate input dir {}", dir.display()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str().map(str::to_string) else {
                continue;
            };
            if name == CLOSE_SENTINEL_FILE || !name.ends_with(".json") {
                continue;
            }
            names.push(name);
        }
        names.sort();

        let mut drained = Vec::new();
        for name in names {
            let path = dir.join(&name);
            let Ok(raw) = std::fs::read_to_string(&path) else {
                continue;
            };
            if std::fs::remove_file(&path).is_err() {
                // Could not claim the file; leave it for the next poll
                // rather than risk a double injection.
                continue;
            }
            match serde_json::from_str::<InputMessage>(&raw) {
                Ok(message) => drained.push(message),
                Err(_) => continue,
            }
        }
        Ok(drained)
    }

    /// Observes and consumes the `_close` sentinel.
    pub fn take_close_sentinel(&self) -> bool {
        std::fs::remove_file(self.close_sentinel_path()).is_ok()
    }

    /// Appends one progress event file for a run.
    pub fn write_progress(&self, run_id: &str, event: &ProgressFileEvent) -> Result<PathBuf> {
        let name = sortable_event_file_name(event.ts_unix_ms, event.seq);
        let path = self.progress_dir(run_id).join(name);
        write_json_atomic(&path, event)?;
        Ok(path)
    }

    /// Reads the pending steer file for a run without consuming it.
    pub fn peek_steer(&self, run_id: &str) -> Result<Option<SteerFile>> {
        let path = self.steer_path(run_id);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read steer file {}", path.display()))
            }
        };
        let steer: SteerFile = serde_json::from_str(&raw)
            .with_context(|| format!("invalid steer file {}", path.display()))?;
        Ok(Some(steer))
    }

    /// Acknowledges a consumed steer event. The ack file is written before
    /// the source is unlinked, so an observer never sees the steer vanish
    /// without its ack.
    pub fn ack_and_remove_steer(&self, steer: &SteerFile, acked_at_unix_ms: u64) -> Result<()> {
        write_json_atomic(
            &self.steer_ack_path(&steer.run_id),
            &SteerAckFile {
                steer_id: steer.steer_id.clone(),
                run_id: steer.run_id.clone(),
                acked_at_unix_ms,
            },
        )?;
        let path = self.steer_path(&steer.run_id);
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to unlink steer file {}", path.display()))?;
        Ok(())
    }
}
