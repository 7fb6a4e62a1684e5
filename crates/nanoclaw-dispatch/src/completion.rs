use serde::{Deserialize, Serialize};
use thiserror::Error;

use nanoclaw_store::{CompletionArtifacts, ContextIntent};

use crate::payload::DispatchPayload;

const COMPLETION_OPEN_TAG: &str = "<completion>";
const COMPLETION_CLOSE_TAG: &str = "</completion>";
const SHA_MIN_LEN: usize = 6;
const SHA_MAX_LEN: usize = 40;

/// Run-id prefixes whose completions may carry a placeholder commit sha.
/// A closed enumeration; anything else is rejected.
pub const NO_CODE_RUN_ID_PREFIXES: [&str; 4] = ["ping-", "smoke-", "health-", "sync-"];

/// Placeholder commit-sha values accepted for no-code runs.
pub const SHA_PLACEHOLDERS: [&str; 2] = ["n/a", "none"];

/// Browser evidence object required when the dispatch demands it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrowserEvidence {
    pub base_url: String,
    #[serde(default)]
    pub tools_listed: Vec<String>,
    #[serde(default)]
    pub execute_tool_evidence: String,
}

/// The JSON object inside `<completion>…</completion>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionReport {
    pub run_id: String,
    pub branch: String,
    pub commit_sha: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub test_result: String,
    #[serde(default)]
    pub risk: String,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub pr_skipped_reason: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub browser_evidence: Option<BrowserEvidence>,
}

/// One violated completion predicate. The first violation in evaluation
/// order is recorded verbatim on the `failed_contract` row.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("output contains no completion block")]
    CompletionMissing,
    #[error("completion block is not a valid JSON object: {0}")]
    CompletionMalformed(String),
    #[error("completion run_id '{observed}' does not match dispatch '{expected}'")]
    RunIdMismatch { expected: String, observed: String },
    #[error("completion branch '{observed}' does not match dispatch '{expected}'")]
    BranchMismatch { expected: String, observed: String },
    #[error("required completion field '{0}' is missing or empty")]
    MissingRequiredField(String),
    #[error("completion must carry exactly one of pr_url and pr_skipped_reason")]
    PrFieldExclusivity,
    #[error("commit_sha '{0}' is not 6-40 hex characters")]
    CommitShaInvalid(String),
    #[error("browser evidence required but absent")]
    BrowserEvidenceMissing,
    #[error("browser evidence invalid: {0}")]
    BrowserEvidenceInvalid(&'static str),
    #[error("context_intent 'continue' requires a session_id in the completion")]
    SessionIdMissing,
}

impl ContractViolation {
    /// Stable predicate identifier recorded on the run row.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CompletionMissing => "completion_missing",
            Self::CompletionMalformed(_) => "completion_malformed",
            Self::RunIdMismatch { .. } => "run_id_mismatch",
            Self::BranchMismatch { .. } => "branch_mismatch",
            Self::MissingRequiredField(_) => "missing_required_field",
            Self::PrFieldExclusivity => "pr_field_exclusivity",
            Self::CommitShaInvalid(_) => "commit_sha_invalid",
            Self::BrowserEvidenceMissing => "browser_evidence_missing",
            Self::BrowserEvidenceInvalid(_) => "browser_evidence_invalid",
            Self::SessionIdMissing => "session_id_missing",
        }
    }

    /// True when no completion block could even be parsed; combined with a
    /// container crash this maps the run to `failed` instead of
    /// `failed_contract`.
    pub fn is_unparseable(&self) -> bool {
        matches!(self, Self::CompletionMissing | Self::CompletionMalformed(_))
    }
}

/// Extracts the raw JSON between the completion tags, if present.
pub fn extract_completion_block(output: &str) -> Option<&str> {
    let open = output.find(COMPLETION_OPEN_TAG)?;
    let body_start = open + COMPLETION_OPEN_TAG.len();
    let close_rel = output[body_start..].find(COMPLETION_CLOSE_TAG)?;
    Some(output[body_start..body_start + close_rel].trim())
}

/// Evaluates the completion contract for a dispatch against container
/// output. Predicates run in the documented order; the first failure wins.
pub fn evaluate_completion(
    dispatch: &DispatchPayload,
    output: &str,
) -> Result<CompletionArtifacts, ContractViolation> {
    let raw = extract_completion_block(output).ok_or(ContractViolation::CompletionMissing)?;
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|error| ContractViolation::CompletionMalformed(error.to_string()))?;
    if !value.is_object() {
        return Err(ContractViolation::CompletionMalformed(
            "completion is not a JSON object".to_string(),
        ));
    }

    let report: CompletionReport = serde_json::from_value(value.clone())
        .map_err(|error| ContractViolation::CompletionMalformed(error.to_string()))?;

    if report.run_id != dispatch.run_id {
        return Err(ContractViolation::RunIdMismatch {
            expected: dispatch.run_id.clone(),
            observed: report.run_id,
        });
    }
    if report.branch != dispatch.branch {
        return Err(ContractViolation::BranchMismatch {
            expected: dispatch.branch.clone(),
            observed: report.branch,
        });
    }
    for field in &dispatch.output_contract.required_fields {
        if !field_is_present(&value, field) {
            return Err(ContractViolation::MissingRequiredField(field.clone()));
        }
    }
    match (&report.pr_url, &report.pr_skipped_reason) {
        (Some(url), None) if !url.trim().is_empty() => {}
        (None, Some(reason)) if !reason.trim().is_empty() => {}
        _ => return Err(ContractViolation::PrFieldExclusivity),
    }
    if !commit_sha_is_valid(&dispatch.run_id, &report.commit_sha) {
        return Err(ContractViolation::CommitShaInvalid(report.commit_sha));
    }
    if dispatch.browser_evidence_required {
        let evidence = report
            .browser_evidence
            .as_ref()
            .ok_or(ContractViolation::BrowserEvidenceMissing)?;
        validate_browser_evidence(evidence)?;
    }
    if dispatch.context_intent == ContextIntent::Continue
        && report
            .session_id
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .is_empty()
    {
        return Err(ContractViolation::SessionIdMissing);
    }

    Ok(CompletionArtifacts {
        branch: report.branch,
        commit_sha: report.commit_sha,
        files_changed: report.files_changed,
        test_result: report.test_result,
        risk: report.risk,
        pr_url: report.pr_url,
        pr_skipped_reason: report.pr_skipped_reason,
    })
}

fn field_is_present(value: &serde_json::Value, field: &str) -> bool {
    // pr_url participates in the exclusivity predicate instead: requiring
    // it here would make every pr_skipped completion fail first.
    if field == "pr_url" || field == "pr_skipped_reason" {
        return true;
    }
    match value.get(field) {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::String(text)) => !text.trim().is_empty(),
        Some(serde_json::Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

fn commit_sha_is_valid(run_id: &str, sha: &str) -> bool {
    if SHA_PLACEHOLDERS.contains(&sha) {
        return NO_CODE_RUN_ID_PREFIXES
            .iter()
            .any(|prefix| run_id.starts_with(prefix));
    }
    sha.len() >= SHA_MIN_LEN
        && sha.len() <= SHA_MAX_LEN
        && sha.chars().all(|ch| ch.is_ascii_hexdigit())
}

fn validate_browser_evidence(evidence: &BrowserEvidence) -> Result<(), ContractViolation> {
    if !evidence.base_url.contains("127.0.0.1") {
        return Err(ContractViolation::BrowserEvidenceInvalid(
            "base_url must target 127.0.0.1",
        ));
    }
    if evidence.tools_listed.is_empty() {
        return Err(ContractViolation::BrowserEvidenceInvalid(
            "tools_listed must be non-empty",
        ));
    }
    if evidence.execute_tool_evidence.trim().is_empty() {
        return Err(ContractViolation::BrowserEvidenceInvalid(
            "execute_tool_evidence must be non-empty",
        ));
    }
    let serialized = serde_json::to_string(evidence).unwrap_or_default();
    if serialized.to_ascii_lowercase().contains("screenshot") {
        return Err(ContractViolation::BrowserEvidenceInvalid(
            "browser evidence may not reference screenshots",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{OutputContract, MIN_COMPLETION_FIELDS};

    fn dispatch() -> DispatchPayload {
        DispatchPayload {
            run_id: "task-1".to_string(),
            target_group: "worker-alpha".to_string(),
            task_type: "implement".to_string(),
            context_intent: ContextIntent::Fresh,
            input: "do X".to_string(),
            repo: "o/r".to_string(),
            branch: "jarvis-x".to_string(),
            base_branch: None,
            acceptance_tests: vec!["t".to_string()],
            output_contract: OutputContract {
                required_fields: MIN_COMPLETION_FIELDS
                    .iter()
                    .map(|field| field.to_string())
                    .chain(std::iter::once("pr_url".to_string()))
                    .collect(),
            },
            parent_run_id: None,
            session_id: None,
            browser_evidence_required: false,
        }
    }

    fn completion_json() -> serde_json::Value {
        serde_json::json!({
            "run_id": "task-1",
            "branch": "jarvis-x",
            "commit_sha": "abc1234",
            "files_changed": ["src/x.rs"],
            "test_result": "pass",
            "risk": "low",
            "pr_url": "https://github.com/o/r/pull/1"
        })
    }

    fn wrap(value: &serde_json::Value) -> String {
        format!("work is done\n<completion>{value}</completion>\ntail")
    }

    #[test]
    fn functional_matching_completion_yields_artifacts() {
        let artifacts =
            evaluate_completion(&dispatch(), &wrap(&completion_json())).expect("accept");
        assert_eq!(artifacts.commit_sha, "abc1234");
        assert_eq!(artifacts.branch, "jarvis-x");
        assert_eq!(artifacts.pr_url.as_deref(), Some("https://github.com/o/r/pull/1"));
    }

    #[test]
    fn unit_missing_block_and_malformed_json_are_unparseable() {
        let missing = evaluate_completion(&dispatch(), "no block here").expect_err("missing");
        assert_eq!(missing.code(), "completion_missing");
        assert!(missing.is_unparseable());

        let malformed = evaluate_completion(&dispatch(), "<completion>{nope</completion>")
            .expect_err("malformed");
        assert_eq!(malformed.code(), "completion_malformed");
        assert!(malformed.is_unparseable());
    }

    #[test]
    fn unit_branch_mismatch_is_the_recorded_predicate() {
        let mut value = completion_json();
        value["branch"] = serde_json::json!("other");
        let violation = evaluate_completion(&dispatch(), &wrap(&value)).expect_err("mismatch");
        assert_eq!(violation.code(), "branch_mismatch");
        assert!(!violation.is_unparseable());
    }

    #[test]
    fn unit_run_id_mismatch_is_detected() {
        let mut value = completion_json();
        value["run_id"] = serde_json::json!("task-2");
        let violation = evaluate_completion(&dispatch(), &wrap(&value)).expect_err("mismatch");
        assert_eq!(violation.code(), "run_id_mismatch");
    }

    #[test]
    fn unit_required_fields_must_be_present_and_non_empty() {
        let mut value = completion_json();
        value["test_result"] = serde_json::json!("");
        let violation = evaluate_completion(&dispatch(), &wrap(&value)).expect_err("empty field");
        assert_eq!(violation.code(), "missing_required_field");
    }

    #[test]
    fn unit_pr_fields_are_mutually_exclusive_and_one_required() {
        let mut value = completion_json();
        value["pr_skipped_reason"] = serde_json::json!("draft only");
        let both = evaluate_completion(&dispatch(), &wrap(&value)).expect_err("both pr fields");
        assert_eq!(both.code(), "pr_field_exclusivity");

        let mut value = completion_json();
        value.as_object_mut().expect("object").remove("pr_url");
        let neither = evaluate_completion(&dispatch(), &wrap(&value)).expect_err("no pr field");
        assert_eq!(neither.code(), "pr_field_exclusivity");
    }

    #[test]
    fn unit_commit_sha_must_be_hex_of_bounded_length() {
        let overlong = "a".repeat(41);
        for bad in ["abc", "zzzzzzz", overlong.as_str()] {
            let mut value = completion_json();
            value["commit_sha"] = serde_json::json!(bad);
            let violation = evaluate_completion(&dispatch(), &wrap(&value)).expect_err("bad sha");
            assert_eq!(violation.code(), "commit_sha_invalid");
        }
    }

    #[test]
    fn functional_sha_placeholder_allowed_only_for_no_code_prefixes() {
        let mut no_code = dispatch();
        no_code.run_id = "ping-check".to_string();
        let mut value = completion_json();
        value["run_id"] = serde_json::json!("ping-check");
        value["commit_sha"] = serde_json::json!("n/a");
        evaluate_completion(&no_code, &wrap(&value)).expect("placeholder accepted");

        let mut value = completion_json();
        value["commit_sha"] = serde_json::json!("none");
        let violation =
            evaluate_completion(&dispatch(), &wrap(&value)).expect_err("placeholder refused");
        assert_eq!(violation.code(), "commit_sha_invalid");
    }

    #[test]
    fn functional_browser_evidence_predicates() {
        let mut demanding = dispatch();
        demanding.browser_evidence_required = true;

        let absent =
            evaluate_completion(&demanding, &wrap(&completion_json())).expect_err("absent");
        assert_eq!(absent.code(), "browser_evidence_missing");

        let mut value = completion_json();
        value["browser_evidence"] = serde_json::json!({
            "base_url": "http://localhost:3000",
            "tools_listed": ["execute"],
            "execute_tool_evidence": "called execute ok"
        });
        let wrong_host = evaluate_completion(&demanding, &wrap(&value)).expect_err("host");
        assert_eq!(wrong_host.code(), "browser_evidence_invalid");

        value["browser_evidence"] = serde_json::json!({
            "base_url": "http://127.0.0.1:3000",
            "tools_listed": ["execute"],
            "execute_tool_evidence": "took a screenshot of the page"
        });
        let screenshot = evaluate_completion(&demanding, &wrap(&value)).expect_err("screenshot");
        assert_eq!(screenshot.code(), "browser_evidence_invalid");

        value["browser_evidence"] = serde_json::json!({
            "base_url": "http://127.0.0.1:3000",
            "tools_listed": ["list_tools", "execute"],
            "execute_tool_evidence": "execute returned 200"
        });
        evaluate_completion(&demanding, &wrap(&value)).expect("valid evidence");
    }

    #[test]
    fn unit_continue_intent_requires_session_id_in_completion() {
        let mut continuing = dispatch();
        continuing.context_intent = ContextIntent::Continue;
        continuing.session_id = Some("sess-1".to_string());

        let violation = evaluate_completion(&continuing, &wrap(&completion_json()))
            .expect_err("session missing");
        assert_eq!(violation.code(), "session_id_missing");

        let mut value = completion_json();
        value["session_id"] = serde_json::json!("sess-2");
        evaluate_completion(&continuing, &wrap(&value)).expect("session present");
    }
}
