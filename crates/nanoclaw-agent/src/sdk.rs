use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// Request for one streaming conversation turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnRequest {
    pub prompt: String,
    /// Resume an existing conversation when present.
    pub session_id: Option<String>,
    /// Credential environment the model process runs with.
    pub env: BTreeMap<String, String>,
    /// Environment variable names scrubbed from every shell command the
    /// agent's tools execute.
    pub secret_env_keys: Vec<String>,
}

/// One event from the live turn stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// An assistant message; `tool_name` is set while a tool is driving.
    Assistant {
        text: String,
        tool_name: Option<String>,
    },
    /// A turn result; the text is what gets framed on stdout.
    Result {
        text: String,
        session_id: Option<String>,
    },
    /// The SDK is about to compact conversation history; archive now.
    CompactionImminent,
}

/// Who said what, for pre-compaction archival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptRole {
    User,
    Assistant,
}

impl TranscriptRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    pub text: String,
}

/// Typed SDK boundary errors the turn loop recovers from or surfaces.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SdkError {
    #[error("unknown or invalid session '{0}'")]
    UnknownSession(String),
    #[error("model rate limited: {0}")]
    RateLimited(String),
    #[error("model stream failed: {0}")]
    Stream(String),
}

/// A live turn. Follow-up messages are pushed into this same stream so the
/// SDK never treats the conversation as single-turn and truncates
/// sub-agents mid-work.
#[async_trait]
pub trait ModelTurnStream: Send {
    /// Next event, or `None` once the stream has drained after input end.
    async fn next_event(&mut self) -> Result<Option<TurnEvent>, SdkError>;

    /// Injects a follow-up user message into the active turn.
    async fn push_user_message(&mut self, text: &str) -> Result<(), SdkError>;

    /// Signals no further input; the stream drains and then yields `None`.
    async fn end_input(&mut self) -> Result<(), SdkError>;

    /// Transcript so far, for the pre-compaction archival hook.
    fn transcript(&self) -> Vec<TranscriptEntry>;
}

/// The model SDK contract the agent consumes. The production impl shells
/// out to the model CLI; tests script one in memory.
#[async_trait]
pub trait ModelSdk: Send + Sync {
    async fn open_turn(&self, request: &TurnRequest) -> Result<Box<dyn ModelTurnStream>, SdkError>;
}
