use std::collections::{BTreeMap, VecDeque};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep, timeout, Instant};

use nanoclaw_ipc::GroupIpc;

use crate::framing::{
    FrameScanEvent, FrameScanner, FrameStatus, OutputFrame, AGENT_STDERR_PREFIX,
    HEARTBEAT_STDERR_TOKEN,
};

const DEFAULT_NO_OUTPUT_TIMEOUT_MS: u64 = 720_000;
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_HARD_TIMEOUT_MS: u64 = 1_800_000;
const DEFAULT_DRAIN_GRACE_MS: u64 = 10_000;
const DEFAULT_STDERR_TAIL_LINES: usize = 64;
const KILL_REAP_TIMEOUT_MS: u64 = 5_000;

/// Timer and teardown configuration for one runner instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRunnerConfig {
    /// Armed at spawn, cancelled on the first valid frame, reset by the
    /// heartbeat stderr token.
    pub no_output_timeout: Duration,
    /// Armed after each frame; firing closes the container's stdin.
    pub idle_timeout: Duration,
    /// Absolute safety ceiling.
    pub hard_timeout: Duration,
    /// How long a container gets to drain and exit after stdin closes (or
    /// after its stdout closes) before the forced kill.
    pub drain_grace: Duration,
    pub stderr_tail_lines: usize,
}

impl Default for ContainerRunnerConfig {
    fn default() -> Self {
        Self {
            no_output_timeout: Duration::from_millis(DEFAULT_NO_OUTPUT_TIMEOUT_MS),
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            hard_timeout: Duration::from_millis(DEFAULT_HARD_TIMEOUT_MS),
            drain_grace: Duration::from_millis(DEFAULT_DRAIN_GRACE_MS),
            stderr_tail_lines: DEFAULT_STDERR_TAIL_LINES,
        }
    }
}

/// One bind mount rendered into the engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

/// Builds the engine command line for an isolated interactive container.
pub fn engine_invocation(
    engine: &str,
    image: &str,
    mounts: &[MountSpec],
    env: &BTreeMap<String, String>,
) -> (String, Vec<String>) {
    let mut args = vec!["run".to_string(), "-i".to_string(), "--rm".to_string()];
    for mount in mounts {
        let suffix = if mount.read_only { ":ro" } else { "" };
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}{suffix}",
            mount.host_path, mount.container_path
        ));
    }
    for (key, value) in env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(image.to_string());
    (engine.to_string(), args)
}

/// Everything needed to launch and feed one container.
#[derive(Debug, Clone)]
pub struct ContainerLaunchSpec {
    pub group: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Serialized stdin JSON object; written followed by a newline. The
    /// agent treats a later stdin EOF as the drain signal.
    pub stdin_payload: String,
    /// When present, stray `_close` sentinels are purged at container
    /// start and again during teardown.
    pub ipc: Option<GroupIpc>,
}

/// Why a container run resolved. Exactly one reason per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerExitReason {
    NaturalExit { exit_code: Option<i32> },
    NoOutputTimeout,
    IdleHardCap,
    HardTimeout,
    SpawnFailed { error: String },
}

impl ContainerExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NaturalExit { .. } => "natural_exit",
            Self::NoOutputTimeout => "no_output_timeout",
            Self::IdleHardCap => "idle_hard_cap",
            Self::HardTimeout => "hard_timeout",
            Self::SpawnFailed { .. } => "container_spawn_failed",
        }
    }
}

/// Final report for one supervised container run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRunOutcome {
    pub frames: Vec<OutputFrame>,
    pub reason: ContainerExitReason,
    /// False when the child exited before producing readable stdout; the
    /// run-state hook was never invoked in that case.
    pub spawn_confirmed: bool,
    pub stderr_tail: Vec<String>,
}

impl ContainerRunOutcome {
    /// Exit 0 is success only if at least one success frame was emitted.
    pub fn succeeded(&self) -> bool {
        matches!(
            self.reason,
            ContainerExitReason::NaturalExit { exit_code: Some(0) }
        ) && self
            .frames
            .iter()
            .any(|frame| frame.status == FrameStatus::Success)
    }

    /// Concatenated result text across frames; the completion contract is
    /// evaluated against this.
    pub fn combined_result_text(&self) -> String {
        self.frames
            .iter()
            .filter_map(|frame| frame.result.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Run-lifecycle callbacks. `on_spawn_confirmed` is what promotes a worker
/// run from `queued` to `running`.
pub trait RunLifecycleHooks: Send + Sync {
    fn on_spawn_confirmed(&self) {}
    fn on_frame(&self, _frame: &OutputFrame) {}
    fn on_agent_log(&self, _line: &str) {}
}

/// Hooks that ignore every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRunHooks;

impl RunLifecycleHooks for NoopRunHooks {}

/// Seam the queue drives; the production impl is `ProcessContainerRunner`
/// and tests substitute scripted fakes.
#[async_trait]
pub trait ContainerLauncher: Send + Sync {
    async fn run(
        &self,
        spec: &ContainerLaunchSpec,
        hooks: &dyn RunLifecycleHooks,
    ) -> ContainerRunOutcome;
}

/// Global fair-FIFO concurrency gate held for the entire container
/// lifetime.
#[derive(Debug, Clone)]
pub struct ContainerGate {
    semaphore: Arc<Semaphore>,
}

impl ContainerGate {
    pub fn new(max_concurrent_containers: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent_containers.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Production container runner over `tokio::process`.
#[derive(Debug, Clone)]
pub struct ProcessContainerRunner {
    config: ContainerRunnerConfig,
    gate: ContainerGate,
}

impl ProcessContainerRunner {
    pub fn new(config: ContainerRunnerConfig, gate: ContainerGate) -> Self {
        Self { config, gate }
    }

    pub fn gate(&self) -> &ContainerGate {
        &self.gate
    }
}

#[async_trait]
impl ContainerLauncher for ProcessContainerRunner {
    async fn run(
        &self,
        spec: &ContainerLaunchSpec,
        hooks: &dyn RunLifecycleHooks,
    ) -> ContainerRunOutcome {
        let permit = self
            .gate
            .semaphore
            .clone()
            .acquire_owned()
            .await;
        let _permit = match permit {
            Ok(permit) => permit,
            Err(_) => {
                return outcome_for_spawn_failure("container gate closed".to_string());
            }
        };

        if let Some(ipc) = &spec.ipc {
            let _ = ipc.clear_stale_close_sentinel();
        }

        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                return outcome_for_spawn_failure(format!(
                    "failed to spawn container for group '{}': {error}",
                    spec.group
                ));
            }
        };

        let mut stdin = child.stdin.take();
        if let Some(handle) = stdin.as_mut() {
            let mut payload = spec.stdin_payload.clone();
            payload.push('\n');
            // Bounded: a child that never reads its stdin must not wedge
            // the runner before any timer is armed. Write failures are
            // left for the supervision loop to observe as an early exit.
            let _ = timeout(self.config.no_output_timeout, async {
                let _ = handle.write_all(payload.as_bytes()).await;
                let _ = handle.flush().await;
            })
            .await;
        }

        let Some(stdout) = child.stdout.take() else {
            terminate_child(&mut child).await;
            return outcome_for_spawn_failure("container stdout was not piped".to_string());
        };
        let mut stdout_lines = BufReader::new(stdout).lines();

        let (stderr_tx, mut stderr_rx) = mpsc::unbounded_channel::<String>();
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if stderr_tx.send(line).is_err() {
                        break;
                    }
                }
            })
        });

        let mut scanner = FrameScanner::new();
        let mut frames: Vec<OutputFrame> = Vec::new();
        let mut stderr_tail: VecDeque<String> = VecDeque::new();
        let mut spawn_confirmed = false;
        let mut saw_frame = false;
        let mut draining_after_idle = false;

        let no_output_sleep = sleep(self.config.no_output_timeout);
        tokio::pin!(no_output_sleep);
        let hard_sleep = sleep(self.config.hard_timeout);
        tokio::pin!(hard_sleep);
        // Armed only once the first frame lands; parked far out until then.
        let idle_sleep = sleep(self.config.hard_timeout.saturating_mul(2));
        tokio::pin!(idle_sleep);
        let mut idle_armed = false;

        let reason = loop {
            tokio::select! {
                line = stdout_lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if !spawn_confirmed {
                            spawn_confirmed = true;
                            hooks.on_spawn_confirmed();
                        }
                        match scanner.push_line(&line) {
                            FrameScanEvent::Frame(frame) => {
                                saw_frame = true;
                                hooks.on_frame(&frame);
                                frames.push(frame);
                                idle_armed = true;
                                draining_after_idle = false;
                                idle_sleep
                                    .as_mut()
                                    .reset(Instant::now() + self.config.idle_timeout);
                            }
                            FrameScanEvent::Malformed(body) => {
                                tracing::warn!(group = %spec.group, "discarding malformed frame body: {body}");
                            }
                            FrameScanEvent::Outside(text) => {
                                tracing::debug!(group = %spec.group, "stdout outside markers: {text}");
                            }
                            FrameScanEvent::Buffered => {}
                        }
                    }
                    Ok(None) | Err(_) => {
                        break natural_exit_after_stdout_close(
                            &mut child,
                            self.config.drain_grace,
                        )
                        .await;
                    }
                },
                Some(line) = stderr_rx.recv() => {
                    if line.contains(HEARTBEAT_STDERR_TOKEN) {
                        no_output_sleep
                            .as_mut()
                            .reset(Instant::now() + self.config.no_output_timeout);
                    }
                    if line.starts_with(AGENT_STDERR_PREFIX) {
                        hooks.on_agent_log(&line);
                        tracing::info!(group = %spec.group, "{line}");
                    }
                    stderr_tail.push_back(line);
                    while stderr_tail.len() > self.config.stderr_tail_lines {
                        stderr_tail.pop_front();
                    }
                },
                _ = &mut no_output_sleep, if !saw_frame => {
                    terminate_child(&mut child).await;
                    break ContainerExitReason::NoOutputTimeout;
                },
                _ = &mut idle_sleep, if idle_armed => {
                    if draining_after_idle {
                        terminate_child(&mut child).await;
                        break ContainerExitReason::IdleHardCap;
                    }
                    draining_after_idle = true;
                    // Closing stdin asks the agent to drain the turn and
                    // exit on its own.
                    stdin.take();
                    idle_sleep
                        .as_mut()
                        .reset(Instant::now() + self.config.drain_grace);
                },
                _ = &mut hard_sleep => {
                    terminate_child(&mut child).await;
                    break ContainerExitReason::HardTimeout;
                },
            }
        };

        // Teardown runs on every exit path.
        drop(stdin);
        terminate_child(&mut child).await;
        while let Ok(line) = stderr_rx.try_recv() {
            stderr_tail.push_back(line);
            while stderr_tail.len() > self.config.stderr_tail_lines {
                stderr_tail.pop_front();
            }
        }
        if let Some(task) = stderr_task {
            task.abort();
        }
        if let Some(ipc) = &spec.ipc {
            let _ = ipc.clear_stale_close_sentinel();
        }

        ContainerRunOutcome {
            frames,
            reason,
            spawn_confirmed,
            stderr_tail: stderr_tail.into_iter().collect(),
        }
    }
}

fn outcome_for_spawn_failure(error: String) -> ContainerRunOutcome {
    ContainerRunOutcome {
        frames: Vec::new(),
        reason: ContainerExitReason::SpawnFailed { error },
        spawn_confirmed: false,
        stderr_tail: Vec::new(),
    }
}

async fn natural_exit_after_stdout_close(
    child: &mut Child,
    drain_grace: Duration,
) -> ContainerExitReason {
    match timeout(drain_grace, child.wait()).await {
        Ok(Ok(status)) => ContainerExitReason::NaturalExit {
            exit_code: status.code(),
        },
        _ => {
            terminate_child(child).await;
            ContainerExitReason::NaturalExit { exit_code: None }
        }
    }
}

async fn terminate_child(child: &mut Child) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    let _ = child.start_kill();
    let _ = timeout(Duration::from_millis(KILL_REAP_TIMEOUT_MS), child.wait()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{OUTPUT_END_MARKER, OUTPUT_START_MARKER};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHooks {
        confirmed: AtomicBool,
        frame_count: AtomicUsize,
        agent_logs: Mutex<Vec<String>>,
    }

    impl RunLifecycleHooks for RecordingHooks {
        fn on_spawn_confirmed(&self) {
            self.confirmed.store(true, Ordering::SeqCst);
        }

        fn on_frame(&self, _frame: &OutputFrame) {
            self.frame_count.fetch_add(1, Ordering::SeqCst);
        }

        fn on_agent_log(&self, line: &str) {
            match self.agent_logs.lock() {
                Ok(mut logs) => logs.push(line.to_string()),
                Err(poisoned) => poisoned.into_inner().push(line.to_string()),
            }
        }
    }

    fn runner(config: ContainerRunnerConfig) -> ProcessContainerRunner {
        ProcessContainerRunner::new(config, ContainerGate::new(4))
    }

    fn shell_spec(script: &str) -> ContainerLaunchSpec {
        ContainerLaunchSpec {
            group: "worker-alpha".to_string(),
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: BTreeMap::new(),
            stdin_payload: r#"{"prompt":"do X"}"#.to_string(),
            ipc: None,
        }
    }

    fn frame_script_line(result: &str) -> String {
        format!(
            "echo '{OUTPUT_START_MARKER}'; \
             echo '{{\"status\":\"success\",\"result\":\"{result}\"}}'; \
             echo '{OUTPUT_END_MARKER}'"
        )
    }

    fn short_timeouts() -> ContainerRunnerConfig {
        ContainerRunnerConfig {
            no_output_timeout: Duration::from_millis(400),
            idle_timeout: Duration::from_millis(400),
            hard_timeout: Duration::from_secs(10),
            drain_grace: Duration::from_millis(400),
            stderr_tail_lines: 16,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_happy_run_emits_frame_and_natural_exit() {
        let hooks = RecordingHooks::default();
        let script = format!("echo noise before; {}; echo trailing", frame_script_line("done"));
        let outcome = runner(short_timeouts())
            .run(&shell_spec(&script), &hooks)
            .await;

        assert_eq!(
            outcome.reason,
            ContainerExitReason::NaturalExit { exit_code: Some(0) }
        );
        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(outcome.frames[0].result.as_deref(), Some("done"));
        assert!(outcome.succeeded());
        assert!(outcome.spawn_confirmed);
        assert!(hooks.confirmed.load(Ordering::SeqCst));
        assert_eq!(hooks.frame_count.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_no_output_timeout_kills_silent_container() {
        let config = ContainerRunnerConfig {
            no_output_timeout: Duration::from_millis(200),
            ..short_timeouts()
        };
        let outcome = runner(config)
            .run(&shell_spec("echo booting; sleep 30"), &NoopRunHooks)
            .await;

        assert_eq!(outcome.reason, ContainerExitReason::NoOutputTimeout);
        assert!(outcome.frames.is_empty());
        assert!(outcome.spawn_confirmed);
        assert!(!outcome.succeeded());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_heartbeat_resets_no_output_deadline() {
        let config = ContainerRunnerConfig {
            no_output_timeout: Duration::from_millis(350),
            ..short_timeouts()
        };
        // Five heartbeats 150 ms apart outlive a 350 ms no-output window
        // only because each beat resets the deadline.
        let script = format!(
            "i=0; while [ $i -lt 5 ]; do echo heartbeat 1>&2; sleep 0.15; i=$((i+1)); done; {}",
            frame_script_line("rescued")
        );
        let outcome = runner(config).run(&shell_spec(&script), &NoopRunHooks).await;

        assert_eq!(
            outcome.reason,
            ContainerExitReason::NaturalExit { exit_code: Some(0) }
        );
        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(outcome.frames[0].result.as_deref(), Some("rescued"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_idle_timeout_closes_stdin_and_container_drains() {
        let config = ContainerRunnerConfig {
            idle_timeout: Duration::from_millis(200),
            drain_grace: Duration::from_secs(2),
            ..short_timeouts()
        };
        // After the frame the script blocks on stdin; the idle timer must
        // close stdin so `cat` sees EOF and the container exits cleanly.
        let script = format!("{}; cat > /dev/null; echo drained", frame_script_line("ok"));
        let outcome = runner(config).run(&shell_spec(&script), &NoopRunHooks).await;

        assert_eq!(
            outcome.reason,
            ContainerExitReason::NaturalExit { exit_code: Some(0) }
        );
        assert!(outcome.succeeded());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_idle_hard_cap_kills_container_that_ignores_stdin_close() {
        let config = ContainerRunnerConfig {
            idle_timeout: Duration::from_millis(200),
            drain_grace: Duration::from_millis(200),
            ..short_timeouts()
        };
        let script = format!("{}; sleep 30", frame_script_line("ok"));
        let outcome = runner(config).run(&shell_spec(&script), &NoopRunHooks).await;

        assert_eq!(outcome.reason, ContainerExitReason::IdleHardCap);
        assert_eq!(outcome.frames.len(), 1);
        assert!(!outcome.succeeded());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_hard_timeout_caps_heartbeating_container() {
        let config = ContainerRunnerConfig {
            no_output_timeout: Duration::from_millis(400),
            hard_timeout: Duration::from_millis(600),
            ..short_timeouts()
        };
        let script = "while true; do echo heartbeat 1>&2; sleep 0.1; done";
        let outcome = runner(config).run(&shell_spec(script), &NoopRunHooks).await;

        assert_eq!(outcome.reason, ContainerExitReason::HardTimeout);
    }

    #[tokio::test]
    async fn unit_spawn_failure_reports_without_confirming() {
        let hooks = RecordingHooks::default();
        let mut spec = shell_spec("true");
        spec.command = "/nonexistent-container-engine".to_string();
        let outcome = runner(short_timeouts()).run(&spec, &hooks).await;

        assert!(matches!(
            outcome.reason,
            ContainerExitReason::SpawnFailed { .. }
        ));
        assert!(!outcome.spawn_confirmed);
        assert!(!hooks.confirmed.load(Ordering::SeqCst));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unit_exit_before_any_output_is_not_confirmed() {
        let hooks = RecordingHooks::default();
        let outcome = runner(short_timeouts())
            .run(&shell_spec("exit 3"), &hooks)
            .await;

        assert_eq!(
            outcome.reason,
            ContainerExitReason::NaturalExit { exit_code: Some(3) }
        );
        assert!(!outcome.spawn_confirmed);
        assert!(!hooks.confirmed.load(Ordering::SeqCst));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_agent_prefixed_stderr_is_lifted_into_hooks() {
        let hooks = RecordingHooks::default();
        let script = format!(
            "echo '[agent-runner] starting turn' 1>&2; {}",
            frame_script_line("ok")
        );
        let outcome = runner(short_timeouts()).run(&shell_spec(&script), &hooks).await;

        assert!(outcome.succeeded());
        let logs = match hooks.agent_logs.lock() {
            Ok(logs) => logs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        assert_eq!(logs, vec!["[agent-runner] starting turn".to_string()]);
        assert!(outcome
            .stderr_tail
            .iter()
            .any(|line| line.contains("starting turn")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn regression_stale_close_sentinel_is_purged_at_container_start() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ipc = GroupIpc::new(temp.path(), "worker-alpha");
        ipc.write_close_sentinel().expect("stale sentinel");

        let mut spec = shell_spec(&frame_script_line("ok"));
        spec.ipc = Some(ipc.clone());
        let outcome = runner(short_timeouts()).run(&spec, &NoopRunHooks).await;

        assert!(outcome.succeeded());
        assert!(!ipc.clear_stale_close_sentinel().expect("already gone"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_gate_serializes_containers_beyond_capacity() {
        let gate = ContainerGate::new(1);
        let runner = Arc::new(ProcessContainerRunner::new(short_timeouts(), gate));
        let script = format!("sleep 0.2; {}", frame_script_line("ok"));

        let started = std::time::Instant::now();
        let first = {
            let runner = runner.clone();
            let spec = shell_spec(&script);
            tokio::spawn(async move { runner.run(&spec, &NoopRunHooks).await })
        };
        let second = {
            let runner = runner.clone();
            let spec = shell_spec(&script);
            tokio::spawn(async move { runner.run(&spec, &NoopRunHooks).await })
        };

        let first = first.await.expect("join first");
        let second = second.await.expect("join second");
        assert!(first.succeeded());
        assert!(second.succeeded());
        assert!(
            started.elapsed() >= Duration::from_millis(400),
            "two 200ms containers through a single permit must serialize"
        );
    }

    #[test]
    fn unit_engine_invocation_renders_mounts_env_and_image() {
        let mut env = BTreeMap::new();
        env.insert("GROUP_FOLDER".to_string(), "worker-alpha".to_string());
        let (command, args) = engine_invocation(
            "docker",
            "nanoclaw-worker:latest",
            &[MountSpec {
                host_path: "/srv/groups/worker-alpha".to_string(),
                container_path: "/workspace/group".to_string(),
                read_only: false,
            }],
            &env,
        );
        assert_eq!(command, "docker");
        assert_eq!(
            args,
            vec![
                "run",
                "-i",
                "--rm",
                "-v",
                "/srv/groups/worker-alpha:/workspace/group",
                "-e",
                "GROUP_FOLDER=worker-alpha",
                "nanoclaw-worker:latest",
            ]
        );
    }
}
