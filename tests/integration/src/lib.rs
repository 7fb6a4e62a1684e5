//! Shared fixtures for the end-to-end worker-run tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use nanoclaw_dispatch::{DispatchPayload, OutputContract, MIN_COMPLETION_FIELDS};
use nanoclaw_ipc::GroupIpc;
use nanoclaw_queue::{GroupQueue, GroupQueueHandle, OutboundDelivery, QueueConfig, WorkerLaunchTemplate};
use nanoclaw_runner::{
    ContainerGate, ContainerRunnerConfig, ProcessContainerRunner, OUTPUT_END_MARKER,
    OUTPUT_START_MARKER,
};
use nanoclaw_store::{ContextIntent, NewMessage, Store};

pub const WORKER_GROUP: &str = "worker-alpha";

/// Runner timeouts tightened for test scripts.
pub fn short_runner_config() -> ContainerRunnerConfig {
    ContainerRunnerConfig {
        no_output_timeout: Duration::from_millis(400),
        idle_timeout: Duration::from_millis(400),
        hard_timeout: Duration::from_secs(15),
        drain_grace: Duration::from_millis(400),
        stderr_tail_lines: 32,
    }
}

pub fn fast_queue_config(max_retries: u32) -> QueueConfig {
    QueueConfig {
        max_retries,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        poll_interval: Duration::from_millis(10),
        batch_limit: 32,
    }
}

/// A worker queue wired to the real process runner, with `/bin/sh -c` as
/// the container engine.
pub struct WorkerFixture {
    pub store: Store,
    pub queue: GroupQueue,
    pub handle: GroupQueueHandle,
    pub outbound_rx: mpsc::UnboundedReceiver<OutboundDelivery>,
}

pub fn worker_fixture(
    ipc_root: &Path,
    script: &str,
    runner_config: ContainerRunnerConfig,
    queue_config: QueueConfig,
) -> WorkerFixture {
    let store = Store::open_in_memory().expect("open store");
    let ipc = GroupIpc::new(ipc_root, WORKER_GROUP);
    let runner = Arc::new(ProcessContainerRunner::new(
        runner_config,
        ContainerGate::new(4),
    ));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let template = WorkerLaunchTemplate {
        command: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        env: BTreeMap::new(),
        secrets: BTreeMap::new(),
        is_main: false,
        assistant_name: None,
        reload_global_instructions: true,
    };
    let (queue, handle) = GroupQueue::new(
        WORKER_GROUP,
        store.clone(),
        ipc,
        runner,
        template,
        queue_config,
        outbound_tx,
    );
    WorkerFixture {
        store,
        queue,
        handle,
        outbound_rx,
    }
}

pub fn sample_dispatch(run_id: &str) -> DispatchPayload {
    DispatchPayload {
        run_id: run_id.to_string(),
        target_group: WORKER_GROUP.to_string(),
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

pub fn enqueue_dispatch(store: &Store, payload: &DispatchPayload) -> u64 {
    store
        .insert_message(&NewMessage {
            group_folder: WORKER_GROUP.to_string(),
            chat_jid: "chat@example".to_string(),
            body: serde_json::to_string(payload).expect("serialize dispatch"),
            received_unix_ms: 1_000,
        })
        .expect("enqueue dispatch message")
}

/// Builds a completion frame as the one-line JSON the framing protocol
/// expects, written to a file so the shell script can emit it verbatim.
pub fn write_completion_frame_file(dir: &Path, run_id: &str, branch: &str) -> std::path::PathBuf {
    let completion = serde_json::json!({
        "run_id": run_id,
        "branch": branch,
        "commit_sha": "abc1234",
        "files_changed": ["src/x.rs"],
        "test_result": "pass",
        "risk": "low",
        "pr_url": "https://github.com/o/r/pull/1"
    });
    let frame = serde_json::json!({
        "status": "success",
        "result": format!("<completion>{completion}</completion>"),
        "newSessionId": "sess-e2e",
        "sessionResumeStatus": "new"
    });
    let path = dir.join(format!("{run_id}-frame.json"));
    // Trailing newline so the end marker lands on its own stdout line.
    std::fs::write(&path, format!("{frame}\n")).expect("write frame file");
    path
}

/// Script fragment that emits the frame file between the output markers.
pub fn emit_frame_script(frame_path: &Path) -> String {
    format!(
        "echo '{OUTPUT_START_MARKER}'; cat '{}'; echo '{OUTPUT_END_MARKER}'",
        frame_path.display()
    )
}
