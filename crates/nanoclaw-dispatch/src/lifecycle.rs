use nanoclaw_store::{
    CreateRunOutcome, NewWorkerRun, RunState, Store, StoreError, TransitionOutcome,
};

use crate::completion::{evaluate_completion, ContractViolation};
use crate::payload::{validate_dispatch_shape, DispatchPayload, DispatchValidationError};

pub const FAILURE_REASON_CONTAINER_CRASH: &str = "container_crash";

/// Result of routing a dispatch through validation and run creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A `queued` run row exists; `retry_count` is zero for a first
    /// dispatch and incremented for an accepted re-dispatch.
    Accepted { retry_count: u32 },
    /// The run id already exists in a non-retryable state.
    DuplicateBlocked { state: RunState },
    /// The payload violated a dispatch rule; no run row was touched.
    Rejected { error: DispatchValidationError },
}

/// Validates a dispatch end to end (shape rules plus the store-dependent
/// parent/session rules) and creates or reconciles the run row.
pub fn accept_dispatch(
    store: &Store,
    from_group: &str,
    payload: &DispatchPayload,
) -> Result<DispatchOutcome, StoreError> {
    if let Err(error) = validate_dispatch_shape(payload, from_group) {
        return Ok(DispatchOutcome::Rejected { error });
    }

    if let Some(parent_run_id) = &payload.parent_run_id {
        if !store.run_exists(parent_run_id)? {
            return Ok(DispatchOutcome::Rejected {
                error: DispatchValidationError::ParentRunUnknown(parent_run_id.clone()),
            });
        }
    }
    if let Some(session_id) = &payload.session_id {
        if let Some(owner) = store.run_for_session(session_id)? {
            if owner.target_group != payload.target_group {
                return Ok(DispatchOutcome::Rejected {
                    error: DispatchValidationError::SessionCrossGroup {
                        session_id: session_id.clone(),
                        owner_group: owner.target_group,
                    },
                });
            }
        }
    }

    Ok(match store.create_run(&new_run_from_payload(payload))? {
        CreateRunOutcome::Created => DispatchOutcome::Accepted { retry_count: 0 },
        CreateRunOutcome::RetryAccepted { retry_count } => {
            DispatchOutcome::Accepted { retry_count }
        }
        CreateRunOutcome::DuplicateBlocked { state } => DispatchOutcome::DuplicateBlocked { state },
    })
}

/// Maps a validated dispatch onto the store's run-row shape. Also used by
/// the queue when it re-dispatches a failed run during batch retry.
pub fn new_run_from_payload(payload: &DispatchPayload) -> NewWorkerRun {
    NewWorkerRun {
        run_id: payload.run_id.clone(),
        target_group: payload.target_group.clone(),
        task_type: payload.task_type.clone(),
        dispatch_repo: payload.repo.clone(),
        dispatch_branch: payload.branch.clone(),
        context_intent: payload.context_intent,
        parent_run_id: payload.parent_run_id.clone(),
        dispatch_session_id: payload.session_id.clone(),
    }
}

/// Terminal resolution applied to a run after its container exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResolution {
    pub state: RunState,
    pub reason: Option<String>,
    /// False when the guarded transition lost a race (e.g. the run was
    /// already failed by a timer path); the row is then left untouched.
    pub applied: bool,
}

/// Scans container output for the completion block and transitions the run
/// to its terminal state. `container_crashed` marks a non-success exit; a
/// crash without a parseable completion maps to `failed` rather than
/// `failed_contract`.
pub fn finalize_run(
    store: &Store,
    dispatch: &DispatchPayload,
    output: &str,
    container_crashed: bool,
) -> Result<RunResolution, StoreError> {
    match evaluate_completion(dispatch, output) {
        Ok(artifacts) => {
            let outcome = store.transition_run(
                &dispatch.run_id,
                &[RunState::Running],
                RunState::ReviewRequested,
                Some(&artifacts),
                None,
            )?;
            Ok(RunResolution {
                state: RunState::ReviewRequested,
                reason: None,
                applied: outcome == TransitionOutcome::Applied,
            })
        }
        Err(violation) if violation.is_unparseable() && container_crashed => {
            let outcome = store.transition_run(
                &dispatch.run_id,
                &[RunState::Running, RunState::Queued],
                RunState::Failed,
                None,
                Some(FAILURE_REASON_CONTAINER_CRASH),
            )?;
            Ok(RunResolution {
                state: RunState::Failed,
                reason: Some(FAILURE_REASON_CONTAINER_CRASH.to_string()),
                applied: outcome == TransitionOutcome::Applied,
            })
        }
        Err(violation) => {
            let reason = violation_reason(&violation);
            let outcome = store.transition_run(
                &dispatch.run_id,
                &[RunState::Running],
                RunState::FailedContract,
                None,
                Some(&reason),
            )?;
            Ok(RunResolution {
                state: RunState::FailedContract,
                reason: Some(reason),
                applied: outcome == TransitionOutcome::Applied,
            })
        }
    }
}

fn violation_reason(violation: &ContractViolation) -> String {
    match violation {
        ContractViolation::MissingRequiredField(field) => {
            format!("{}:{field}", violation.code())
        }
        other => other.code().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{OutputContract, MIN_COMPLETION_FIELDS};
    use nanoclaw_store::ContextIntent;

    fn dispatch(run_id: &str) -> DispatchPayload {
        DispatchPayload {
            run_id: run_id.to_string(),
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

    fn completion_output(run_id: &str) -> String {
        format!(
            "<completion>{}</completion>",
            serde_json::json!({
                "run_id": run_id,
                "branch": "jarvis-x",
                "commit_sha": "abc1234",
                "files_changed": ["src/x.rs"],
                "test_result": "pass",
                "risk": "low",
                "pr_url": "https://github.com/o/r/pull/1"
            })
        )
    }

    fn promote_to_running(store: &Store, run_id: &str) {
        store
            .transition_run(run_id, &[RunState::Queued], RunState::Running, None, None)
            .expect("promote");
    }

    #[test]
    fn functional_happy_worker_run_round_trip() {
        let store = Store::open_in_memory().expect("open");
        let payload = dispatch("task-1");
        assert_eq!(
            accept_dispatch(&store, "controller-developer", &payload).expect("accept"),
            DispatchOutcome::Accepted { retry_count: 0 }
        );
        promote_to_running(&store, "task-1");

        let resolution =
            finalize_run(&store, &payload, &completion_output("task-1"), false).expect("finalize");
        assert!(resolution.applied);
        assert_eq!(resolution.state, RunState::ReviewRequested);

        let run = store.run("task-1").expect("load");
        assert_eq!(run.state, RunState::ReviewRequested);
        assert_eq!(run.retry_count, 0);
        let completion = run.completion.expect("artifacts");
        assert_eq!(completion.commit_sha, "abc1234");
    }

    #[test]
    fn functional_branch_mismatch_lands_failed_contract_with_predicate() {
        let store = Store::open_in_memory().expect("open");
        let payload = dispatch("task-2");
        accept_dispatch(&store, "controller-developer", &payload).expect("accept");
        promote_to_running(&store, "task-2");

        let output = completion_output("task-2").replace("jarvis-x", "other");
        let resolution = finalize_run(&store, &payload, &output, false).expect("finalize");
        assert_eq!(resolution.state, RunState::FailedContract);
        assert_eq!(resolution.reason.as_deref(), Some("branch_mismatch"));

        let run = store.run("task-2").expect("load");
        assert_eq!(run.state, RunState::FailedContract);
        assert_eq!(run.failure_reason.as_deref(), Some("branch_mismatch"));
        assert!(run.completion.is_none());
    }

    #[test]
    fn functional_crash_without_completion_is_failed_not_contract() {
        let store = Store::open_in_memory().expect("open");
        let payload = dispatch("task-3");
        accept_dispatch(&store, "controller-developer", &payload).expect("accept");
        promote_to_running(&store, "task-3");

        let resolution = finalize_run(&store, &payload, "partial logs only", true)
            .expect("finalize crashed run");
        assert_eq!(resolution.state, RunState::Failed);
        assert_eq!(
            resolution.reason.as_deref(),
            Some(FAILURE_REASON_CONTAINER_CRASH)
        );
        assert_eq!(
            store.run("task-3").expect("load").state,
            RunState::Failed
        );
    }

    #[test]
    fn functional_clean_exit_without_completion_is_a_contract_failure() {
        let store = Store::open_in_memory().expect("open");
        let payload = dispatch("task-4");
        accept_dispatch(&store, "controller-developer", &payload).expect("accept");
        promote_to_running(&store, "task-4");

        let resolution =
            finalize_run(&store, &payload, "finished without block", false).expect("finalize");
        assert_eq!(resolution.state, RunState::FailedContract);
        assert_eq!(resolution.reason.as_deref(), Some("completion_missing"));
    }

    #[test]
    fn functional_redispatch_after_contract_failure_increments_retry() {
        let store = Store::open_in_memory().expect("open");
        let payload = dispatch("task-5");
        accept_dispatch(&store, "controller-developer", &payload).expect("accept");
        promote_to_running(&store, "task-5");
        finalize_run(&store, &payload, "no completion", false).expect("fail contract");

        assert_eq!(
            accept_dispatch(&store, "controller-developer", &payload).expect("retry"),
            DispatchOutcome::Accepted { retry_count: 1 }
        );
        assert_eq!(store.run("task-5").expect("load").state, RunState::Queued);
    }

    #[test]
    fn unit_duplicate_dispatch_in_flight_is_blocked() {
        let store = Store::open_in_memory().expect("open");
        let payload = dispatch("task-6");
        accept_dispatch(&store, "controller-developer", &payload).expect("accept");
        promote_to_running(&store, "task-6");

        assert_eq!(
            accept_dispatch(&store, "controller-developer", &payload).expect("duplicate"),
            DispatchOutcome::DuplicateBlocked {
                state: RunState::Running
            }
        );
    }

    #[test]
    fn unit_unknown_parent_run_is_rejected_without_a_row() {
        let store = Store::open_in_memory().expect("open");
        let mut payload = dispatch("task-7");
        payload.parent_run_id = Some("no-such-run".to_string());

        let outcome =
            accept_dispatch(&store, "controller-developer", &payload).expect("dispatch");
        assert!(matches!(
            outcome,
            DispatchOutcome::Rejected {
                error: DispatchValidationError::ParentRunUnknown(_)
            }
        ));
        assert!(!store.run_exists("task-7").expect("lookup"));
    }

    #[test]
    fn functional_continue_session_may_not_cross_worker_groups() {
        let store = Store::open_in_memory().expect("open");
        let first = dispatch("task-8");
        accept_dispatch(&store, "controller-developer", &first).expect("accept");
        store
            .record_session_outcome(
                "task-8",
                Some("sess-owned"),
                "dispatch",
                nanoclaw_store::SessionResumeStatus::New,
                None,
            )
            .expect("session telemetry");

        let mut crossing = dispatch("task-9");
        crossing.target_group = "worker-beta".to_string();
        crossing.context_intent = ContextIntent::Continue;
        crossing.session_id = Some("sess-owned".to_string());

        let outcome =
            accept_dispatch(&store, "controller-developer", &crossing).expect("dispatch");
        assert!(matches!(
            outcome,
            DispatchOutcome::Rejected {
                error: DispatchValidationError::SessionCrossGroup { .. }
            }
        ));
    }
}
