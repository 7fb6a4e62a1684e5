use serde::{Deserialize, Serialize};

pub const INPUT_DIR: &str = "input";
pub const PROGRESS_DIR: &str = "progress";
pub const STEER_DIR: &str = "steer";
pub const CLOSE_SENTINEL_FILE: &str = "_close";
pub const STEER_ACK_SUFFIX: &str = ".acked.json";

/// One host-written message file under `input/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputMessage {
    Message { text: String },
}

impl InputMessage {
    pub fn text(&self) -> &str {
        match self {
            Self::Message { text } => text,
        }
    }
}

/// One container-written event file under `progress/<run_id>/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressFileEvent {
    pub ts_unix_ms: u64,
    pub seq: u64,
    pub phase: String,
    pub summary: String,
}

/// The host-written `steer/<run_id>.json` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SteerFile {
    pub steer_id: String,
    pub run_id: String,
    pub from_group: String,
    pub message: String,
    pub sent_at_unix_ms: u64,
}

/// The container-written `steer/<run_id>.acked.json` sentinel. The ack is
/// the at-most-once idempotency key for steering delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SteerAckFile {
    pub steer_id: String,
    pub run_id: String,
    pub acked_at_unix_ms: u64,
}
