use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Notify};

use nanoclaw_dispatch::{finalize_run, new_run_from_payload, parse_dispatch_payload, DispatchPayload};
use nanoclaw_ipc::GroupIpc;
use nanoclaw_runner::{
    ContainerExitReason, ContainerLaunchSpec, ContainerLauncher, ContainerRunOutcome,
    ContainerStdinPayload, OutputFrame, RunLifecycleHooks,
};
use nanoclaw_store::{
    CreateRunOutcome, MessageRecord, RunState, SessionResumeStatus, Store, TransitionOutcome,
};

pub const FAILURE_REASON_SPAWN_BEFORE_RUNNING: &str = "container_spawn_failed_before_running";
const DEAD_LETTER_REASON: &str = "queue_retry_exhausted";

/// Retry and pacing knobs for one group worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Additional delivery attempts after the first failure.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Fallback poll cadence for inbound rows when no wake arrives.
    pub poll_interval: Duration,
    pub batch_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            batch_limit: 32,
        }
    }
}

/// How this group's containers are launched: the engine invocation plus
/// the lane's payload attributes and secret scope.
#[derive(Debug, Clone, Default)]
pub struct WorkerLaunchTemplate {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub secrets: BTreeMap<String, String>,
    pub is_main: bool,
    pub assistant_name: Option<String>,
    pub reload_global_instructions: bool,
}

/// One chat-bound text produced by a container frame or a lifecycle
/// notice; the host forwards these to the chat channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundDelivery {
    pub group: String,
    pub chat_jid: String,
    pub text: String,
}

/// Wake/cancel handle shared with the host router.
#[derive(Debug, Clone)]
pub struct GroupQueueHandle {
    group: String,
    notify: Arc<Notify>,
    stopped: Arc<AtomicBool>,
    ipc: GroupIpc,
}

impl GroupQueueHandle {
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Wakes the worker after a new row was ingested for this group.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Drains the queue and asks the live container (if any) to finish
    /// gracefully via the `_close` sentinel. The container keeps its
    /// timers; it finishes or times out on its own.
    pub fn cancel(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Err(error) = self.ipc.write_close_sentinel() {
            tracing::warn!(group = %self.group, "failed to write close sentinel: {error:#}");
        }
        self.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// The single popper for one group's queue.
pub struct GroupQueue {
    group: String,
    store: Store,
    ipc: GroupIpc,
    launcher: Arc<dyn ContainerLauncher>,
    template: WorkerLaunchTemplate,
    config: QueueConfig,
    outbound: mpsc::UnboundedSender<OutboundDelivery>,
    notify: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

impl GroupQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        group: impl Into<String>,
        store: Store,
        ipc: GroupIpc,
        launcher: Arc<dyn ContainerLauncher>,
        template: WorkerLaunchTemplate,
        config: QueueConfig,
        outbound: mpsc::UnboundedSender<OutboundDelivery>,
    ) -> (Self, GroupQueueHandle) {
        let group = group.into();
        let notify = Arc::new(Notify::new());
        let stopped = Arc::new(AtomicBool::new(false));
        let handle = GroupQueueHandle {
            group: group.clone(),
            notify: notify.clone(),
            stopped: stopped.clone(),
            ipc: ipc.clone(),
        };
        (
            Self {
                group,
                store,
                ipc,
                launcher,
                template,
                config,
                outbound,
                notify,
                stopped,
            },
            handle,
        )
    }

    /// Long-running worker loop. A fatal store error stops the worker and
    /// preserves the cursor for a clean restart.
    pub async fn run_worker(self) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            match self.process_available().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(error) => {
                    tracing::error!(group = %self.group, "queue worker stopping: {error:#}");
                    break;
                }
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Pops and fully processes one batch. Returns false when the queue is
    /// idle.
    pub async fn process_available(&self) -> Result<bool> {
        let cursor = self
            .store
            .cursor(&self.group)
            .context("failed to load group cursor")?;
        let batch = self
            .store
            .messages_after(&self.group, cursor, self.config.batch_limit)
            .context("failed to read pending messages")?;
        let Some(first) = batch.first() else {
            return Ok(false);
        };

        if let Ok(payload) = parse_dispatch_payload(&first.body) {
            self.process_run_batch(first, &payload).await?;
        } else {
            self.process_message_batch(&batch).await?;
        }
        Ok(true)
    }

    async fn process_message_batch(&self, batch: &[MessageRecord]) -> Result<()> {
        let prompt = batch
            .iter()
            .map(|message| message.body.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let chat_jid = batch[0].chat_jid.clone();
        let first_seq = batch[0].ingest_seq;
        let last_seq = batch[batch.len() - 1].ingest_seq;

        let mut attempt = 0_u32;
        loop {
            let outcome = self.launch_turn(&prompt, &chat_jid, None, None).await;
            if !outcome.frames.is_empty() {
                self.store
                    .advance_cursor(&self.group, last_seq)
                    .context("failed to advance cursor after delivery")?;
                return Ok(());
            }

            if attempt >= self.config.max_retries || self.stopped.load(Ordering::SeqCst) {
                self.dead_letter(&prompt, first_seq, last_seq, &outcome)?;
                self.send_notice(
                    &chat_jid,
                    format!(
                        "message batch dead-lettered after {attempt} retries ({})",
                        outcome.reason.as_str()
                    ),
                );
                return Ok(());
            }
            attempt += 1;
            tokio::time::sleep(backoff_delay(&self.config, attempt)).await;
        }
    }

    async fn process_run_batch(
        &self,
        message: &MessageRecord,
        payload: &DispatchPayload,
    ) -> Result<()> {
        let chat_jid = message.chat_jid.clone();
        let seq = message.ingest_seq;
        let prompt = worker_prompt(payload);

        let mut attempt = 0_u32;
        loop {
            let outcome = self
                .launch_turn(
                    &prompt,
                    &chat_jid,
                    Some(&payload.run_id),
                    payload.session_id.as_deref(),
                )
                .await;

            if !outcome.frames.is_empty() {
                self.record_session_telemetry(payload, &outcome);
                let resolution =
                    finalize_run(&self.store, payload, &outcome.combined_result_text(), !outcome.succeeded())
                        .context("failed to finalize run")?;
                self.expire_unconsumed_steer(&payload.run_id);
                self.store
                    .advance_cursor(&self.group, seq)
                    .context("failed to advance cursor after run delivery")?;
                self.send_notice(
                    &chat_jid,
                    match &resolution.reason {
                        Some(reason) => {
                            format!("[{}] {} ({reason})", payload.run_id, resolution.state.as_str())
                        }
                        None => format!("[{}] {}", payload.run_id, resolution.state.as_str()),
                    },
                );
                return Ok(());
            }

            // Zero frames delivered: the cursor stays put and the run is
            // resolved with the typed reason from the runner. A container
            // that exited before confirming spawn gets the distinct
            // spawn-failure reason; one killed by a timer ran fine and
            // keeps the timer's reason.
            let reason = match &outcome.reason {
                ContainerExitReason::SpawnFailed { .. } => FAILURE_REASON_SPAWN_BEFORE_RUNNING,
                ContainerExitReason::NaturalExit { .. } if !outcome.spawn_confirmed => {
                    FAILURE_REASON_SPAWN_BEFORE_RUNNING
                }
                other => other.as_str(),
            };
            let transition = self
                .store
                .transition_run(
                    &payload.run_id,
                    &[RunState::Queued, RunState::Running],
                    RunState::Failed,
                    None,
                    Some(reason),
                )
                .context("failed to record run failure")?;
            if let TransitionOutcome::Rejected { current } = transition {
                tracing::warn!(
                    group = %self.group,
                    run_id = %payload.run_id,
                    "failure transition rejected from state {}",
                    current.as_str()
                );
            }

            if attempt >= self.config.max_retries || self.stopped.load(Ordering::SeqCst) {
                self.dead_letter(&message.body, seq, seq, &outcome)?;
                self.expire_unconsumed_steer(&payload.run_id);
                self.store
                    .advance_cursor(&self.group, seq)
                    .context("failed to advance cursor after dead-letter")?;
                self.send_notice(
                    &chat_jid,
                    format!("[{}] failed ({reason})", payload.run_id),
                );
                return Ok(());
            }
            attempt += 1;
            tokio::time::sleep(backoff_delay(&self.config, attempt)).await;

            // Queue-level retry is a re-dispatch of the failed run: same
            // run_id, retry_count incremented.
            match self
                .store
                .create_run(&new_run_from_payload(payload))
                .context("failed to requeue run for retry")?
            {
                CreateRunOutcome::RetryAccepted { .. } => {}
                other => {
                    tracing::warn!(
                        group = %self.group,
                        run_id = %payload.run_id,
                        "run retry not accepted: {other:?}"
                    );
                    return Ok(());
                }
            }
        }
    }

    async fn launch_turn(
        &self,
        prompt: &str,
        chat_jid: &str,
        run_id: Option<&str>,
        session_id: Option<&str>,
    ) -> ContainerRunOutcome {
        let stdin_payload = ContainerStdinPayload {
            prompt: prompt.to_string(),
            session_id: session_id.map(str::to_string),
            group_folder: self.group.clone(),
            chat_jid: chat_jid.to_string(),
            is_main: self.template.is_main,
            is_scheduled_task: None,
            assistant_name: self.template.assistant_name.clone(),
            secrets: self.template.secrets.clone(),
            run_id: run_id.map(str::to_string),
            reload_global_instructions: self.template.reload_global_instructions
                && !self.template.is_main,
        };
        let spec = ContainerLaunchSpec {
            group: self.group.clone(),
            command: self.template.command.clone(),
            args: self.template.args.clone(),
            env: self.template.env.clone(),
            stdin_payload: serde_json::to_string(&stdin_payload).unwrap_or_default(),
            ipc: Some(self.ipc.clone()),
        };
        let hooks = DeliveryHooks {
            group: self.group.clone(),
            chat_jid: chat_jid.to_string(),
            outbound: self.outbound.clone(),
            store: self.store.clone(),
            run_id: run_id.map(str::to_string),
        };
        self.launcher.run(&spec, &hooks).await
    }

    fn record_session_telemetry(&self, payload: &DispatchPayload, outcome: &ContainerRunOutcome) {
        let Some(frame) = outcome
            .frames
            .iter()
            .rev()
            .find(|frame| frame.new_session_id.is_some() || frame.session_resume_status.is_some())
        else {
            return;
        };
        let resume_status = frame
            .session_resume_status
            .as_deref()
            .and_then(SessionResumeStatus::parse)
            .unwrap_or(SessionResumeStatus::New);
        let selection_source = if payload.session_id.is_some() {
            "dispatch"
        } else {
            "fresh"
        };
        if let Err(error) = self.store.record_session_outcome(
            &payload.run_id,
            frame.new_session_id.as_deref(),
            selection_source,
            resume_status,
            frame.session_resume_error.as_deref(),
        ) {
            tracing::warn!(
                group = %self.group,
                run_id = %payload.run_id,
                "failed to record session telemetry: {error}"
            );
        }
    }

    /// A steer file the agent never consumed is expired once its run is
    /// terminal; leaving it in place would inject it into an unrelated
    /// later retry.
    fn expire_unconsumed_steer(&self, run_id: &str) {
        let steer = match self.ipc.peek_steer(run_id) {
            Ok(Some(steer)) => steer,
            Ok(None) => return,
            Err(error) => {
                tracing::warn!(group = %self.group, run_id = %run_id, "steer peek failed: {error:#}");
                return;
            }
        };
        if let Err(error) = self.store.expire_steer(&steer.steer_id) {
            tracing::warn!(group = %self.group, run_id = %run_id, "steer expiry failed: {error}");
        }
        if let Err(error) = self.ipc.remove_steer(run_id) {
            tracing::warn!(group = %self.group, run_id = %run_id, "steer removal failed: {error:#}");
        }
    }

    fn dead_letter(
        &self,
        body: &str,
        first_seq: u64,
        last_seq: u64,
        outcome: &ContainerRunOutcome,
    ) -> Result<()> {
        tracing::warn!(
            group = %self.group,
            "dead-lettering batch [{first_seq}..{last_seq}] after {}",
            outcome.reason.as_str()
        );
        self.store
            .record_dead_letter(&self.group, body, first_seq, last_seq, DEAD_LETTER_REASON)
            .context("failed to record dead letter")
    }

    fn send_notice(&self, chat_jid: &str, text: String) {
        let _ = self.outbound.send(OutboundDelivery {
            group: self.group.clone(),
            chat_jid: chat_jid.to_string(),
            text,
        });
    }
}

struct DeliveryHooks {
    group: String,
    chat_jid: String,
    outbound: mpsc::UnboundedSender<OutboundDelivery>,
    store: Store,
    run_id: Option<String>,
}

impl RunLifecycleHooks for DeliveryHooks {
    fn on_spawn_confirmed(&self) {
        let Some(run_id) = &self.run_id else {
            return;
        };
        match self
            .store
            .transition_run(run_id, &[RunState::Queued], RunState::Running, None, None)
        {
            Ok(TransitionOutcome::Applied) => {}
            Ok(TransitionOutcome::Rejected { current }) => {
                tracing::warn!(
                    group = %self.group,
                    run_id = %run_id,
                    "duplicate running promotion rejected from {}",
                    current.as_str()
                );
            }
            Err(error) => {
                tracing::error!(group = %self.group, run_id = %run_id, "promotion failed: {error}");
            }
        }
    }

    fn on_frame(&self, frame: &OutputFrame) {
        if let Some(result) = &frame.result {
            let _ = self.outbound.send(OutboundDelivery {
                group: self.group.clone(),
                chat_jid: self.chat_jid.clone(),
                text: result.clone(),
            });
        }
    }
}

fn backoff_delay(config: &QueueConfig, attempt: u32) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
    config.base_backoff.saturating_mul(factor).min(config.max_backoff)
}

/// Renders the dispatch into the worker container's turn prompt, including
/// the completion-contract reminder.
fn worker_prompt(payload: &DispatchPayload) -> String {
    let mut prompt = format!(
        "Run {run_id}: {task_type} on {repo}, branch {branch}.\n\n{input}\n\nAcceptance tests:\n",
        run_id = payload.run_id,
        task_type = payload.task_type,
        repo = payload.repo,
        branch = payload.branch,
        input = payload.input.trim(),
    );
    for test in &payload.acceptance_tests {
        prompt.push_str("- ");
        prompt.push_str(test);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nWhen finished, emit <completion>{…}</completion> with the fields: ",
    );
    prompt.push_str(&payload.output_contract.required_fields.join(", "));
    prompt.push('.');
    prompt
}
