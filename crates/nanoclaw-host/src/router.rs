use std::collections::BTreeMap;

use anyhow::{Context, Result};

use nanoclaw_core::current_unix_timestamp_ms;
use nanoclaw_dispatch::{accept_dispatch, extract_dispatch_json, DispatchOutcome};
use nanoclaw_store::{NewMessage, RunState, Store};

use crate::lane::{evaluate_dispatch_authorization, DispatchAuthorization, LaneClass};

/// One group known to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRegistration {
    pub group_folder: String,
    pub lane: LaneClass,
}

impl GroupRegistration {
    pub fn for_folder(group_folder: impl Into<String>) -> Self {
        let group_folder = group_folder.into();
        let lane = LaneClass::for_group(&group_folder);
        Self { group_folder, lane }
    }
}

/// What routing one piece of agent output amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// No dispatch payload was embedded in the text.
    NoDispatch,
    /// The lane matrix refused the dispatch; no run row exists.
    PolicyBlocked { reason_code: String },
    /// Validation refused the dispatch; no run row exists.
    DispatchRejected { code: &'static str },
    /// The dispatch was recorded and enqueued into the target group.
    DispatchAccepted {
        run_id: String,
        target_group: String,
        retry_count: u32,
        ingest_seq: u64,
    },
    /// The run id already exists in a non-retryable state.
    DuplicateBlocked { run_id: String, state: RunState },
}

/// Routes inbound chat to group queues and controller output through the
/// dispatch validator.
#[derive(Debug, Clone)]
pub struct HostRouter {
    store: Store,
    lanes: BTreeMap<String, LaneClass>,
}

impl HostRouter {
    pub fn new(store: Store, registrations: &[GroupRegistration]) -> Self {
        let lanes = registrations
            .iter()
            .map(|registration| (registration.group_folder.clone(), registration.lane))
            .collect();
        Self { store, lanes }
    }

    pub fn lane_of(&self, group_folder: &str) -> Option<LaneClass> {
        self.lanes.get(group_folder).copied()
    }

    pub fn registered_groups(&self) -> Vec<String> {
        self.lanes.keys().cloned().collect()
    }

    /// Ingests one inbound chat message, returning `(group, ingest_seq)`.
    /// Messages for unregistered groups fall back to the main lane.
    pub fn ingest_inbound(
        &self,
        chat_jid: &str,
        group_folder: &str,
        body: &str,
    ) -> Result<(String, u64)> {
        let group = if self.lanes.contains_key(group_folder) {
            group_folder.to_string()
        } else {
            tracing::warn!("unregistered group '{group_folder}', routing to main");
            "main".to_string()
        };
        let seq = self
            .store
            .insert_message(&NewMessage {
                group_folder: group.clone(),
                chat_jid: chat_jid.to_string(),
                body: body.to_string(),
                received_unix_ms: current_unix_timestamp_ms(),
            })
            .context("failed to ingest inbound message")?;
        Ok((group, seq))
    }

    /// Scans agent output for a dispatch payload and routes it through the
    /// authorization matrix and the validator. Policy violations create no
    /// run row and are logged as `policy-blocked dispatch`, distinct from
    /// validation failures.
    pub fn handle_agent_output(
        &self,
        from_group: &str,
        chat_jid: &str,
        text: &str,
    ) -> Result<RouteOutcome> {
        let Some((payload, _slice)) = extract_dispatch_json(text) else {
            return Ok(RouteOutcome::NoDispatch);
        };

        let from_lane = self
            .lane_of(from_group)
            .unwrap_or_else(|| LaneClass::for_group(from_group));
        let target_registered = self.lanes.contains_key(&payload.target_group);
        if let DispatchAuthorization::Deny { reason_code } = evaluate_dispatch_authorization(
            from_lane,
            from_group,
            &payload.target_group,
            target_registered,
        ) {
            tracing::warn!(
                from = %from_group,
                target = %payload.target_group,
                run_id = %payload.run_id,
                "policy-blocked dispatch: {reason_code}"
            );
            return Ok(RouteOutcome::PolicyBlocked {
                reason_code: reason_code.to_string(),
            });
        }

        match accept_dispatch(&self.store, from_group, &payload)
            .context("dispatch acceptance failed")?
        {
            DispatchOutcome::Rejected { error } => {
                tracing::warn!(
                    from = %from_group,
                    run_id = %payload.run_id,
                    "dispatch rejected: {error}"
                );
                Ok(RouteOutcome::DispatchRejected { code: error.code() })
            }
            DispatchOutcome::DuplicateBlocked { state } => {
                tracing::info!(
                    run_id = %payload.run_id,
                    "duplicate_blocked: run already {}",
                    state.as_str()
                );
                Ok(RouteOutcome::DuplicateBlocked {
                    run_id: payload.run_id.clone(),
                    state,
                })
            }
            DispatchOutcome::Accepted { retry_count } => {
                let body = serde_json::to_string(&payload)
                    .context("failed to serialize accepted dispatch")?;
                let seq = self
                    .store
                    .insert_message(&NewMessage {
                        group_folder: payload.target_group.clone(),
                        chat_jid: chat_jid.to_string(),
                        body,
                        received_unix_ms: current_unix_timestamp_ms(),
                    })
                    .context("failed to enqueue dispatch for target group")?;
                tracing::info!(
                    run_id = %payload.run_id,
                    target = %payload.target_group,
                    retry_count,
                    "dispatch accepted"
                );
                Ok(RouteOutcome::DispatchAccepted {
                    run_id: payload.run_id.clone(),
                    target_group: payload.target_group.clone(),
                    retry_count,
                    ingest_seq: seq,
                })
            }
        }
    }
}
