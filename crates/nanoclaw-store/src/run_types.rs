use serde::{Deserialize, Serialize};

/// Enumerates worker run lifecycle states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    ReviewRequested,
    FailedContract,
    Failed,
    Done,
}

impl RunState {
    /// Returns the stable snake_case wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::ReviewRequested => "review_requested",
            Self::FailedContract => "failed_contract",
            Self::Failed => "failed",
            Self::Done => "done",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "review_requested" => Some(Self::ReviewRequested),
            "failed_contract" => Some(Self::FailedContract),
            "failed" => Some(Self::Failed),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    /// Returns true when the run cannot transition any further without a
    /// re-dispatch.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ReviewRequested | Self::Done | Self::FailedContract | Self::Failed
        )
    }

    /// Returns true when a re-dispatch of the same run id is accepted.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Failed | Self::FailedContract)
    }
}

/// Whether a dispatched run starts a fresh conversation or continues one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextIntent {
    Fresh,
    Continue,
}

impl ContextIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Continue => "continue",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "fresh" => Some(Self::Fresh),
            "continue" => Some(Self::Continue),
            _ => None,
        }
    }
}

/// How the agent's model session was established for a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionResumeStatus {
    Resumed,
    FallbackNew,
    New,
}

impl SessionResumeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resumed => "resumed",
            Self::FallbackNew => "fallback_new",
            Self::New => "new",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "resumed" => Some(Self::Resumed),
            "fallback_new" => Some(Self::FallbackNew),
            "new" => Some(Self::New),
            _ => None,
        }
    }
}

/// Steering event delivery status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SteerStatus {
    Pending,
    Acked,
    Expired,
}

impl SteerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acked => "acked",
            Self::Expired => "expired",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "acked" => Some(Self::Acked),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Input row for message ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub group_folder: String,
    pub chat_jid: String,
    pub body: String,
    pub received_unix_ms: u64,
}

/// Durable ingested message with its allocated monotonic sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub ingest_seq: u64,
    pub group_folder: String,
    pub chat_jid: String,
    pub body: String,
    pub received_unix_ms: u64,
}

/// Dispatch columns recorded when a worker run is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkerRun {
    pub run_id: String,
    pub target_group: String,
    pub task_type: String,
    pub dispatch_repo: String,
    pub dispatch_branch: String,
    pub context_intent: ContextIntent,
    pub parent_run_id: Option<String>,
    pub dispatch_session_id: Option<String>,
}

/// Artifacts parsed from an accepted `<completion>` block. Written in the
/// same transaction as the move to `review_requested`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionArtifacts {
    pub branch: String,
    pub commit_sha: String,
    pub files_changed: Vec<String>,
    pub test_result: String,
    pub risk: String,
    pub pr_url: Option<String>,
    pub pr_skipped_reason: Option<String>,
}

/// Full worker run row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRunRecord {
    pub run_id: String,
    pub state: RunState,
    pub retry_count: u32,
    pub target_group: String,
    pub task_type: String,
    pub dispatch_repo: String,
    pub dispatch_branch: String,
    pub context_intent: ContextIntent,
    pub parent_run_id: Option<String>,
    pub dispatch_session_id: Option<String>,
    pub selected_session_id: Option<String>,
    pub effective_session_id: Option<String>,
    pub session_selection_source: Option<String>,
    pub session_resume_status: Option<SessionResumeStatus>,
    pub session_resume_error: Option<String>,
    pub completion: Option<CompletionArtifacts>,
    pub failure_reason: Option<String>,
    pub last_progress_summary: Option<String>,
    pub last_progress_unix_ms: Option<u64>,
    pub steer_count: u32,
    pub created_unix_ms: u64,
    pub updated_unix_ms: u64,
}

/// Outcome of `create_run`; duplicates and retries are expected
/// alternatives, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateRunOutcome {
    Created,
    RetryAccepted { retry_count: u32 },
    DuplicateBlocked { state: RunState },
}

/// Outcome of `transition_run`; a rejection tells the caller it lost a
/// race (e.g. a duplicate `running` promotion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    Rejected { current: RunState },
}

/// Out-of-band steering message injected into an in-flight worker turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SteerEventRecord {
    pub steer_id: String,
    pub run_id: String,
    pub from_group: String,
    pub message: String,
    pub sent_at_unix_ms: u64,
    #[serde(default)]
    pub acked_at_unix_ms: Option<u64>,
    pub status: SteerStatus,
}

/// A message batch whose delivery retries were exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    pub id: u64,
    pub group_folder: String,
    pub body: String,
    pub first_ingest_seq: u64,
    pub last_ingest_seq: u64,
    pub reason: String,
    pub created_unix_ms: u64,
}
