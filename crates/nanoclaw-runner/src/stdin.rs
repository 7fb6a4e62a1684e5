use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The JSON object written to the container's stdin at spawn, camelCase on
/// the wire. One line, newline-terminated; a later stdin EOF tells the
/// agent to drain the turn and exit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStdinPayload {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub group_folder: String,
    pub chat_jid: String,
    pub is_main: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_scheduled_task: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_name: Option<String>,
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    /// Present for worker run batches; names the progress/steer IPC paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Whether the agent re-reads the global instruction file. False for
    /// the main lane, where the SDK already injects it.
    #[serde(default)]
    pub reload_global_instructions: bool,
}
