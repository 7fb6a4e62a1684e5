use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use nanoclaw_agent::sdk_cli::CliModelSdk;
use nanoclaw_agent::{run_agent_turns, AgentRunnerConfig};
use nanoclaw_runner::{
    ContainerStdinPayload, FrameStatus, OutputFrame, HEARTBEAT_STDERR_TOKEN, OUTPUT_END_MARKER,
    OUTPUT_START_MARKER,
};

const HEARTBEAT_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(error) => {
            eprintln!("[agent-runner] fatal: {error:#}");
            emit_frame(&OutputFrame {
                status: FrameStatus::Error,
                result: None,
                new_session_id: None,
                session_resume_status: None,
                session_resume_error: None,
                error: Some(format!("{error:#}")),
            });
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<bool> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let first_line = lines
        .next_line()
        .await
        .context("failed to read stdin payload")?
        .ok_or_else(|| anyhow!("stdin closed before a payload arrived"))?;
    let payload: ContainerStdinPayload =
        serde_json::from_str(first_line.trim()).context("invalid stdin payload")?;
    eprintln!(
        "[agent-runner] starting turn for group {} (run {:?})",
        payload.group_folder, payload.run_id
    );

    // A later stdin EOF is the host asking us to drain and exit.
    let close_requested = Arc::new(AtomicBool::new(false));
    {
        let close_requested = close_requested.clone();
        tokio::spawn(async move {
            let mut lines = lines;
            while let Ok(Some(_)) = lines.next_line().await {}
            close_requested.store(true, Ordering::SeqCst);
        });
    }

    tokio::spawn(async {
        let mut tick = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        loop {
            tick.tick().await;
            eprintln!("{HEARTBEAT_STDERR_TOKEN}");
        }
    });

    let config = AgentRunnerConfig::from_env();
    let sdk = CliModelSdk::from_env();
    let mut emit = |frame: &OutputFrame| emit_frame(frame);
    let report = run_agent_turns(&sdk, &config, &payload, close_requested, &mut emit).await?;
    eprintln!(
        "[agent-runner] turn loop finished: frames={} followups={} steers={} lane_switched={}",
        report.frames_emitted, report.followups_injected, report.steers_acked, report.lane_switched
    );
    Ok(report.success_frames > 0)
}

fn emit_frame(frame: &OutputFrame) {
    let body = match serde_json::to_string(frame) {
        Ok(body) => body,
        Err(error) => {
            eprintln!("[agent-runner] frame serialization failed: {error}");
            return;
        }
    };
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    let _ = writeln!(handle, "{OUTPUT_START_MARKER}");
    let _ = writeln!(handle, "{body}");
    let _ = writeln!(handle, "{OUTPUT_END_MARKER}");
    let _ = handle.flush();
}
