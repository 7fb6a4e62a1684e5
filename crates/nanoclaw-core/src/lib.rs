//! Foundational low-level utilities shared across Nanoclaw crates.
//!
//! Provides atomic file-write helpers, time utilities, and the sortable
//! event-file naming scheme used by the filesystem IPC surface and the
//! append-only operational event logs.

pub mod atomic_io;
pub mod event_log;
pub mod time_utils;

pub use atomic_io::{write_json_atomic, write_text_atomic};
pub use event_log::{append_jsonl_line, parse_event_file_name, sortable_event_file_name};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms};
