//! In-container agent runner.
//!
//! Reads the stdin payload, opens one long-lived streaming model turn, and
//! keeps that turn fed: IPC input files become follow-up user messages in
//! the *same* turn, steering files are injected and acked, progress is
//! emitted throttled, and a heartbeat line keeps the host's no-output
//! timer at bay. Results are framed on stdout for the host parser.

pub mod archive;
pub mod auth;
pub mod progress;
pub mod scrub;
pub mod sdk;
pub mod sdk_cli;
pub mod turn_loop;

pub use archive::archive_transcript;
pub use auth::{
    auth_fallback_allowed, is_rate_limit_message, split_credential_sets, AuthLaneConfig,
    CredentialEnvironment, RATE_LIMIT_TEXT_PATTERNS,
};
pub use progress::{classify_phase, summarize_for_progress, ProgressThrottle};
pub use scrub::prepend_secret_unset;
pub use sdk::{
    ModelSdk, ModelTurnStream, SdkError, TranscriptEntry, TranscriptRole, TurnEvent, TurnRequest,
};
pub use turn_loop::{run_agent_turns, AgentRunnerConfig, TurnLoopReport};
