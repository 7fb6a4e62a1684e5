use serde::{Deserialize, Serialize};
use thiserror::Error;

use nanoclaw_store::ContextIntent;

/// Closed set of dispatchable task types.
pub const TASK_TYPES: [&str; 8] = [
    "analyze",
    "implement",
    "fix",
    "refactor",
    "test",
    "release",
    "research",
    "code",
];

/// Fields every output contract must require at minimum; a completion
/// missing any of these can never finalize a run.
pub const MIN_COMPLETION_FIELDS: [&str; 6] = [
    "run_id",
    "branch",
    "commit_sha",
    "files_changed",
    "test_result",
    "risk",
];

const RUN_ID_MAX_LEN: usize = 64;
const BRANCH_PREFIX: &str = "jarvis-";

/// Output contract carried by a dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputContract {
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// A controller-emitted dispatch instructing a worker lane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchPayload {
    pub run_id: String,
    pub target_group: String,
    pub task_type: String,
    pub context_intent: ContextIntent,
    pub input: String,
    pub repo: String,
    pub branch: String,
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub acceptance_tests: Vec<String>,
    #[serde(default)]
    pub output_contract: OutputContract,
    #[serde(default)]
    pub parent_run_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub browser_evidence_required: bool,
}

/// One violated dispatch rule. `code()` is the stable wire identifier
/// surfaced to the controller lane and embedded in policy logs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchValidationError {
    #[error("run_id must be 1-64 characters with no whitespace")]
    RunIdInvalid,
    #[error("unknown task_type '{0}'")]
    TaskTypeUnknown(String),
    #[error("context_intent 'fresh' forbids session_id")]
    SessionForbiddenForFresh,
    #[error("input must be non-empty")]
    InputEmpty,
    #[error("repo '{0}' must have the <owner>/<repo> shape")]
    RepoShapeInvalid(String),
    #[error("branch '{0}' must match jarvis-<feature>")]
    BranchShapeInvalid(String),
    #[error("acceptance_tests must be a non-empty array of non-empty strings")]
    AcceptanceTestsEmpty,
    #[error("output_contract.required_fields must include '{0}'")]
    OutputContractIncomplete(String),
    #[error("parent_run_id '{0}' does not refer to an existing run")]
    ParentRunUnknown(String),
    #[error("session '{session_id}' belongs to group '{owner_group}'")]
    SessionCrossGroup {
        session_id: String,
        owner_group: String,
    },
    #[error("dispatch requests screenshot capture or analysis")]
    ScreenshotRefused,
    #[error("controller dispatch may not target its own group")]
    SelfDispatch,
}

impl DispatchValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RunIdInvalid => "dispatch_run_id_invalid",
            Self::TaskTypeUnknown(_) => "dispatch_task_type_unknown",
            Self::SessionForbiddenForFresh => "dispatch_context_intent_conflict",
            Self::InputEmpty => "dispatch_input_empty",
            Self::RepoShapeInvalid(_) => "dispatch_repo_shape_invalid",
            Self::BranchShapeInvalid(_) => "dispatch_branch_shape_invalid",
            Self::AcceptanceTestsEmpty => "dispatch_acceptance_tests_empty",
            Self::OutputContractIncomplete(_) => "dispatch_output_contract_incomplete",
            Self::ParentRunUnknown(_) => "dispatch_parent_run_unknown",
            Self::SessionCrossGroup { .. } => "dispatch_session_cross_group",
            Self::ScreenshotRefused => "dispatch_screenshot_refused",
            Self::SelfDispatch => "dispatch_self_target",
        }
    }
}

/// Scans controller output for an embedded dispatch JSON object. Returns
/// the first balanced `{…}` slice that parses as a dispatch payload.
pub fn extract_dispatch_json(output: &str) -> Option<(DispatchPayload, &str)> {
    let mut search_from = 0;
    while let Some(open_rel) = output[search_from..].find('{') {
        let open = search_from + open_rel;
        if let Some(slice) = balanced_json_object(&output[open..]) {
            if let Ok(payload) = parse_dispatch_payload(slice) {
                return Some((payload, slice));
            }
            search_from = open + 1;
        } else {
            return None;
        }
    }
    None
}

fn balanced_json_object(raw: &str) -> Option<&str> {
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;
    for (index, ch) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&raw[..=index]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses a raw JSON string as a dispatch payload. A parse failure here is
/// a malformed dispatch, distinct from the per-field rules below.
pub fn parse_dispatch_payload(raw: &str) -> anyhow::Result<DispatchPayload> {
    let payload = serde_json::from_str::<DispatchPayload>(raw)?;
    Ok(payload)
}

/// Validates every store-independent dispatch rule. Store-dependent rules
/// (parent existence, session ownership) are checked by `accept_dispatch`.
pub fn validate_dispatch_shape(
    payload: &DispatchPayload,
    from_group: &str,
) -> Result<(), DispatchValidationError> {
    if payload.target_group == from_group {
        return Err(DispatchValidationError::SelfDispatch);
    }
    if payload.run_id.is_empty()
        || payload.run_id.len() > RUN_ID_MAX_LEN
        || payload.run_id.chars().any(char::is_whitespace)
    {
        return Err(DispatchValidationError::RunIdInvalid);
    }
    if !TASK_TYPES.contains(&payload.task_type.as_str()) {
        return Err(DispatchValidationError::TaskTypeUnknown(
            payload.task_type.clone(),
        ));
    }
    if payload.context_intent == ContextIntent::Fresh && payload.session_id.is_some() {
        return Err(DispatchValidationError::SessionForbiddenForFresh);
    }
    if payload.input.trim().is_empty() {
        return Err(DispatchValidationError::InputEmpty);
    }
    if !repo_shape_is_valid(&payload.repo) {
        return Err(DispatchValidationError::RepoShapeInvalid(
            payload.repo.clone(),
        ));
    }
    if !branch_shape_is_valid(&payload.branch) {
        return Err(DispatchValidationError::BranchShapeInvalid(
            payload.branch.clone(),
        ));
    }
    if payload.acceptance_tests.is_empty()
        || payload
            .acceptance_tests
            .iter()
            .any(|test| test.trim().is_empty())
    {
        return Err(DispatchValidationError::AcceptanceTestsEmpty);
    }
    for field in MIN_COMPLETION_FIELDS {
        if !payload
            .output_contract
            .required_fields
            .iter()
            .any(|required| required == field)
        {
            return Err(DispatchValidationError::OutputContractIncomplete(
                field.to_string(),
            ));
        }
    }
    if requests_screenshots(payload) {
        return Err(DispatchValidationError::ScreenshotRefused);
    }
    Ok(())
}

fn repo_shape_is_valid(repo: &str) -> bool {
    let Some((owner, name)) = repo.split_once('/') else {
        return false;
    };
    !owner.is_empty()
        && !name.is_empty()
        && !name.contains('/')
        && !repo.chars().any(char::is_whitespace)
}

fn branch_shape_is_valid(branch: &str) -> bool {
    let Some(feature) = branch.strip_prefix(BRANCH_PREFIX) else {
        return false;
    };
    !feature.is_empty() && !branch.chars().any(char::is_whitespace)
}

fn requests_screenshots(payload: &DispatchPayload) -> bool {
    let mentions = |text: &str| text.to_ascii_lowercase().contains("screenshot");
    mentions(&payload.input) || payload.acceptance_tests.iter().any(|test| mentions(test))
}
