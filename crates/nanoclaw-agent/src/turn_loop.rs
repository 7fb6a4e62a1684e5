use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use nanoclaw_core::current_unix_timestamp_ms;
use nanoclaw_ipc::{GroupIpc, ProgressFileEvent};
use nanoclaw_runner::{ContainerStdinPayload, FrameStatus, OutputFrame};

use crate::archive::archive_transcript;
use crate::auth::{auth_fallback_allowed, is_rate_limit_message, split_credential_sets, AuthLaneConfig};
use crate::progress::{classify_phase, summarize_for_progress, ProgressThrottle};
use crate::sdk::{ModelSdk, ModelTurnStream, SdkError, TurnEvent, TurnRequest};

pub const RESUME_STATUS_RESUMED: &str = "resumed";
pub const RESUME_STATUS_FALLBACK_NEW: &str = "fallback_new";
pub const RESUME_STATUS_NEW: &str = "new";

const ERROR_MODEL_RATE_LIMITED: &str = "model_rate_limited";

/// Poll cadences and paths for one agent process.
#[derive(Debug, Clone)]
pub struct AgentRunnerConfig {
    pub ipc_root: PathBuf,
    pub conversations_dir: PathBuf,
    pub input_poll_interval: Duration,
    pub steer_poll_interval: Duration,
    pub progress_throttle: Duration,
    pub auth: AuthLaneConfig,
}

impl Default for AgentRunnerConfig {
    fn default() -> Self {
        Self {
            ipc_root: PathBuf::from("/workspace/ipc"),
            conversations_dir: PathBuf::from("/workspace/group/conversations"),
            input_poll_interval: Duration::from_millis(500),
            steer_poll_interval: Duration::from_millis(500),
            progress_throttle: Duration::from_secs(5),
            auth: AuthLaneConfig::default(),
        }
    }
}

impl AgentRunnerConfig {
    /// Environment overrides for the in-container paths and the auth
    /// fallback toggle.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(root) = std::env::var("NANOCLAW_IPC_ROOT") {
            if !root.trim().is_empty() {
                config.ipc_root = PathBuf::from(root);
            }
        }
        if let Ok(dir) = std::env::var("NANOCLAW_CONVERSATIONS_DIR") {
            if !dir.trim().is_empty() {
                config.conversations_dir = PathBuf::from(dir);
            }
        }
        if let Ok(flag) = std::env::var("NANOCLAW_AUTH_FALLBACK") {
            config.auth.fallback_enabled = flag.trim() != "0";
        }
        config
    }
}

/// Counters for one agent process lifetime, surfaced in diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnLoopReport {
    pub frames_emitted: usize,
    pub success_frames: usize,
    pub followups_injected: usize,
    pub steers_acked: usize,
    pub lane_switched: bool,
    pub session_resume_status: String,
}

/// Runs the agent's single long-lived turn loop until the stream drains.
///
/// `close_requested` is flipped by the stdin watcher when the host closes
/// the container's stdin; together with the `_close` IPC sentinel it asks
/// the loop to end input and drain.
pub async fn run_agent_turns<S, F>(
    sdk: &S,
    config: &AgentRunnerConfig,
    payload: &ContainerStdinPayload,
    close_requested: Arc<AtomicBool>,
    emit: &mut F,
) -> Result<TurnLoopReport>
where
    S: ModelSdk,
    F: FnMut(&OutputFrame),
{
    let ipc = GroupIpc::new(&config.ipc_root, &payload.group_folder);
    let _ = ipc.clear_stale_close_sentinel();

    let credentials = split_credential_sets(&payload.secrets);
    let mut request = TurnRequest {
        prompt: payload.prompt.clone(),
        session_id: payload.session_id.clone(),
        env: credentials.primary.clone(),
        secret_env_keys: credentials.primary.keys().cloned().collect(),
    };

    let mut report = TurnLoopReport {
        session_resume_status: if request.session_id.is_some() {
            RESUME_STATUS_RESUMED.to_string()
        } else {
            RESUME_STATUS_NEW.to_string()
        },
        ..TurnLoopReport::default()
    };
    let mut resume_error: Option<String> = None;
    let mut resume_fallback_used = false;

    let mut stream = match sdk.open_turn(&request).await {
        Ok(stream) => stream,
        Err(SdkError::UnknownSession(message)) if request.session_id.is_some() => {
            resume_error = Some(message);
            resume_fallback_used = true;
            report.session_resume_status = RESUME_STATUS_FALLBACK_NEW.to_string();
            request.session_id = None;
            sdk.open_turn(&request)
                .await
                .map_err(|error| anyhow!("session resume fallback failed: {error}"))?
        }
        Err(error) => return Err(anyhow!("failed to open model turn: {error}")),
    };

    let mut throttle = ProgressThrottle::new(config.progress_throttle);
    let mut progress_seq: u64 = 0;
    let mut input_tick = tokio::time::interval(config.input_poll_interval);
    input_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut steer_tick = tokio::time::interval(config.steer_poll_interval);
    steer_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut closing = false;
    let mut last_user_text = payload.prompt.clone();

    loop {
        // Biased with the poll ticks first: a due input or steering poll
        // is serviced before the stream is allowed to report drained, so a
        // pending injection is never skipped at shutdown.
        tokio::select! {
            biased;
            _ = input_tick.tick() => {
                match ipc.drain_input() {
                    Ok(messages) => {
                        for message in messages {
                            let text = message.text().to_string();
                            if let Err(error) = stream.push_user_message(&text).await {
                                eprintln!("[agent-runner] follow-up injection failed: {error}");
                                continue;
                            }
                            last_user_text = text;
                            report.followups_injected += 1;
                        }
                    }
                    Err(error) => {
                        eprintln!("[agent-runner] input poll failed: {error:#}");
                    }
                }
                let close_now = close_requested.load(Ordering::SeqCst) || ipc.take_close_sentinel();
                if close_now && !closing {
                    closing = true;
                    eprintln!("[agent-runner] close requested; draining turn");
                    if let Err(error) = stream.end_input().await {
                        eprintln!("[agent-runner] input end failed: {error}");
                        break;
                    }
                }
            },
            _ = steer_tick.tick() => {
                let Some(run_id) = payload.run_id.as_deref() else {
                    continue;
                };
                match ipc.peek_steer(run_id) {
                    Ok(Some(steer)) => {
                        let injected =
                            format!("[steer from {}] {}", steer.from_group, steer.message);
                        if let Err(error) = stream.push_user_message(&injected).await {
                            eprintln!("[agent-runner] steering injection failed: {error}");
                            continue;
                        }
                        last_user_text = injected;
                        match ipc.ack_and_remove_steer(&steer, current_unix_timestamp_ms()) {
                            Ok(()) => report.steers_acked += 1,
                            Err(error) => {
                                eprintln!("[agent-runner] steering ack failed: {error:#}");
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        eprintln!("[agent-runner] steering poll failed: {error:#}");
                    }
                }
            },
            event = stream.next_event() => match event {
                Ok(Some(TurnEvent::Assistant { text, tool_name })) => {
                    if is_rate_limit_message(&text) {
                        match recover_from_rate_limit(
                            sdk,
                            config,
                            payload,
                            &credentials.alternate,
                            &mut request,
                            &last_user_text,
                            &mut report,
                        )
                        .await?
                        {
                            Some(replacement) => {
                                stream = replacement;
                                continue;
                            }
                            None => {
                                emit_frame(emit, &mut report, rate_limited_frame(&text));
                                break;
                            }
                        }
                    }
                    if let Some(run_id) = payload.run_id.as_deref() {
                        if throttle.should_emit(Instant::now()) {
                            progress_seq += 1;
                            let event = ProgressFileEvent {
                                ts_unix_ms: current_unix_timestamp_ms(),
                                seq: progress_seq,
                                phase: classify_phase(tool_name.as_deref()),
                                summary: summarize_for_progress(&text),
                            };
                            if let Err(error) = ipc.write_progress(run_id, &event) {
                                eprintln!("[agent-runner] progress write failed: {error:#}");
                            }
                        }
                    }
                }
                Ok(Some(TurnEvent::Result { text, session_id })) => {
                    if is_rate_limit_message(&text) {
                        match recover_from_rate_limit(
                            sdk,
                            config,
                            payload,
                            &credentials.alternate,
                            &mut request,
                            &last_user_text,
                            &mut report,
                        )
                        .await?
                        {
                            Some(replacement) => {
                                stream = replacement;
                                continue;
                            }
                            None => {
                                emit_frame(emit, &mut report, rate_limited_frame(&text));
                                break;
                            }
                        }
                    }
                    let frame = OutputFrame {
                        status: FrameStatus::Success,
                        result: Some(text),
                        new_session_id: session_id,
                        session_resume_status: Some(report.session_resume_status.clone()),
                        session_resume_error: resume_error.clone(),
                        error: None,
                    };
                    emit_frame(emit, &mut report, frame);
                }
                Ok(Some(TurnEvent::CompactionImminent)) => {
                    let entries = stream.transcript();
                    match archive_transcript(
                        &config.conversations_dir,
                        &entries,
                        chrono::Utc::now(),
                    ) {
                        Ok(path) => {
                            eprintln!("[agent-runner] archived transcript to {}", path.display());
                        }
                        Err(error) => {
                            eprintln!("[agent-runner] transcript archive failed: {error:#}");
                        }
                    }
                }
                Ok(None) => break,
                Err(SdkError::UnknownSession(message))
                    if !resume_fallback_used && payload.session_id.is_some() =>
                {
                    resume_fallback_used = true;
                    resume_error = Some(message);
                    report.session_resume_status = RESUME_STATUS_FALLBACK_NEW.to_string();
                    request.session_id = None;
                    stream = sdk
                        .open_turn(&request)
                        .await
                        .map_err(|error| anyhow!("session resume fallback failed: {error}"))?;
                }
                Err(SdkError::RateLimited(message)) => {
                    match recover_from_rate_limit(
                        sdk,
                        config,
                        payload,
                        &credentials.alternate,
                        &mut request,
                        &last_user_text,
                        &mut report,
                    )
                    .await?
                    {
                        Some(replacement) => stream = replacement,
                        None => {
                            emit_frame(emit, &mut report, rate_limited_frame(&message));
                            break;
                        }
                    }
                }
                Err(error) => {
                    let session_resume_status = report.session_resume_status.clone();
                    emit_frame(
                        emit,
                        &mut report,
                        OutputFrame {
                            status: FrameStatus::Error,
                            result: None,
                            new_session_id: None,
                            session_resume_status: Some(session_resume_status),
                            session_resume_error: resume_error.clone(),
                            error: Some(error.to_string()),
                        },
                    );
                    break;
                }
            },
        }
    }

    Ok(report)
}

fn emit_frame<F: FnMut(&OutputFrame)>(emit: &mut F, report: &mut TurnLoopReport, frame: OutputFrame) {
    report.frames_emitted += 1;
    if frame.status == FrameStatus::Success {
        report.success_frames += 1;
    }
    emit(&frame);
}

fn rate_limited_frame(detail: &str) -> OutputFrame {
    OutputFrame {
        status: FrameStatus::Error,
        result: None,
        new_session_id: None,
        session_resume_status: None,
        session_resume_error: None,
        error: Some(format!("{ERROR_MODEL_RATE_LIMITED}: {detail}")),
    }
}

/// Attempts the auth-lane switch. Returns the replacement stream, or
/// `None` when this lane must fail loudly instead.
async fn recover_from_rate_limit<S: ModelSdk>(
    sdk: &S,
    config: &AgentRunnerConfig,
    payload: &ContainerStdinPayload,
    alternate: &Option<BTreeMap<String, String>>,
    request: &mut TurnRequest,
    last_user_text: &str,
    report: &mut TurnLoopReport,
) -> Result<Option<Box<dyn ModelTurnStream>>> {
    if report.lane_switched
        || !auth_fallback_allowed(&config.auth, &payload.group_folder, payload.is_main)
    {
        return Ok(None);
    }
    let Some(alternate) = alternate else {
        return Ok(None);
    };

    report.lane_switched = true;
    eprintln!("[agent-runner] rate limited; rebuilding onto the alternate auth lane");
    request.env = alternate.clone();
    request.secret_env_keys = alternate.keys().cloned().collect();
    // The session belongs to the exhausted lane; discard it and re-run the
    // last prompt from scratch.
    request.session_id = None;
    request.prompt = last_user_text.to_string();
    let stream = sdk
        .open_turn(request)
        .await
        .map_err(|error| anyhow!("auth lane fallback failed: {error}"))?;
    Ok(Some(stream))
}
