//! End-to-end worker-run scenarios over real `/bin/sh` containers.

#![cfg(unix)]

use nanoclaw_dispatch::accept_dispatch;
use nanoclaw_store::RunState;
use tempfile::tempdir;

use nanoclaw_integration_tests::{
    emit_frame_script, enqueue_dispatch, fast_queue_config, sample_dispatch, short_runner_config,
    worker_fixture, write_completion_frame_file, WORKER_GROUP,
};

#[tokio::test]
async fn integration_happy_worker_run_reaches_review_requested() {
    let temp = tempdir().expect("tempdir");
    let frame_path = write_completion_frame_file(temp.path(), "task-1", "jarvis-x");
    // The container reads its stdin payload, chats some noise outside the
    // markers, then emits the completion frame.
    let script = format!(
        "read payload; echo 'starting up'; {}; echo 'shutting down'",
        emit_frame_script(&frame_path)
    );
    let mut fixture = worker_fixture(
        temp.path(),
        &script,
        short_runner_config(),
        fast_queue_config(1),
    );

    let payload = sample_dispatch("task-1");
    accept_dispatch(&fixture.store, "controller-developer", &payload).expect("accept");
    let seq = enqueue_dispatch(&fixture.store, &payload);

    assert!(fixture.queue.process_available().await.expect("process"));

    let run = fixture.store.run("task-1").expect("run");
    assert_eq!(run.state, RunState::ReviewRequested);
    assert_eq!(run.retry_count, 0);
    assert_eq!(run.effective_session_id.as_deref(), Some("sess-e2e"));
    let completion = run.completion.expect("artifacts");
    assert_eq!(completion.commit_sha, "abc1234");
    assert_eq!(completion.branch, "jarvis-x");
    assert_eq!(fixture.store.cursor(WORKER_GROUP).expect("cursor"), seq);

    // The frame text reached the outbound channel before the notice.
    let frame = fixture.outbound_rx.try_recv().expect("frame delivery");
    assert!(frame.text.contains("<completion>"));
    let notice = fixture.outbound_rx.try_recv().expect("notice");
    assert!(notice.text.contains("[task-1] review_requested"));
}

#[tokio::test]
async fn integration_completion_mismatch_lands_failed_contract() {
    let temp = tempdir().expect("tempdir");
    // The completion names a branch the dispatch never asked for.
    let frame_path = write_completion_frame_file(temp.path(), "task-2", "other-branch");
    let script = format!("read payload; {}", emit_frame_script(&frame_path));
    let fixture = worker_fixture(
        temp.path(),
        &script,
        short_runner_config(),
        fast_queue_config(1),
    );

    let payload = sample_dispatch("task-2");
    accept_dispatch(&fixture.store, "controller-developer", &payload).expect("accept");
    enqueue_dispatch(&fixture.store, &payload);

    assert!(fixture.queue.process_available().await.expect("process"));

    let run = fixture.store.run("task-2").expect("run");
    assert_eq!(run.state, RunState::FailedContract);
    assert_eq!(run.failure_reason.as_deref(), Some("branch_mismatch"));
    assert!(run.completion.is_none());
}

#[tokio::test]
async fn integration_silent_container_is_killed_and_run_fails() {
    let temp = tempdir().expect("tempdir");
    // Confirms spawn with one stdout line, then goes silent far past the
    // no-output window.
    let script = "read payload; echo booting; sleep 30";
    let fixture = worker_fixture(
        temp.path(),
        script,
        short_runner_config(),
        fast_queue_config(0),
    );

    let payload = sample_dispatch("task-3");
    accept_dispatch(&fixture.store, "controller-developer", &payload).expect("accept");
    enqueue_dispatch(&fixture.store, &payload);

    assert!(fixture.queue.process_available().await.expect("process"));

    let run = fixture.store.run("task-3").expect("run");
    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.failure_reason.as_deref(), Some("no_output_timeout"));
    let letters = fixture.store.dead_letters(WORKER_GROUP).expect("letters");
    assert_eq!(letters.len(), 1);
}

#[tokio::test]
async fn integration_heartbeat_keeps_slow_container_alive_to_completion() {
    let temp = tempdir().expect("tempdir");
    let frame_path = write_completion_frame_file(temp.path(), "task-4", "jarvis-x");
    // Five stderr heartbeats 150 ms apart outlast the 400 ms no-output
    // window only because each beat resets the deadline.
    let script = format!(
        "read payload; i=0; while [ $i -lt 5 ]; do echo heartbeat 1>&2; sleep 0.15; i=$((i+1)); done; {}",
        emit_frame_script(&frame_path)
    );
    let fixture = worker_fixture(
        temp.path(),
        &script,
        short_runner_config(),
        fast_queue_config(0),
    );

    let payload = sample_dispatch("task-4");
    accept_dispatch(&fixture.store, "controller-developer", &payload).expect("accept");
    enqueue_dispatch(&fixture.store, &payload);

    assert!(fixture.queue.process_available().await.expect("process"));

    let run = fixture.store.run("task-4").expect("run");
    assert_eq!(run.state, RunState::ReviewRequested);
    assert_eq!(run.retry_count, 0);
}
