use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::mpsc;

use nanoclaw_core::current_unix_timestamp_ms;
use nanoclaw_ipc::GroupIpc;
use nanoclaw_queue::OutboundDelivery;
use nanoclaw_store::{RunState, Store};

/// Forwards container-written progress events to the controller lane as
/// `[run_id] ↻ {summary}` lines and mirrors the latest one onto the run
/// row. Polled every 2 s; progress is best-effort, so every error here is
/// logged and skipped.
#[derive(Debug)]
pub struct ProgressForwarder {
    store: Store,
    ipc_root: PathBuf,
    controller_group: String,
    controller_chat_jid: String,
    outbound: mpsc::UnboundedSender<OutboundDelivery>,
    watermarks: HashMap<String, (u64, u64)>,
}

impl ProgressForwarder {
    pub fn new(
        store: Store,
        ipc_root: PathBuf,
        controller_group: impl Into<String>,
        controller_chat_jid: impl Into<String>,
        outbound: mpsc::UnboundedSender<OutboundDelivery>,
    ) -> Self {
        Self {
            store,
            ipc_root,
            controller_group: controller_group.into(),
            controller_chat_jid: controller_chat_jid.into(),
            outbound,
            watermarks: HashMap::new(),
        }
    }

    /// Sweeps every running run in the given groups once. Returns how many
    /// events were forwarded.
    pub fn poll_once(&mut self, worker_groups: &[String]) -> usize {
        let mut forwarded = 0;
        for group in worker_groups {
            let runs = match self.store.runs_in_state(group, RunState::Running) {
                Ok(runs) => runs,
                Err(error) => {
                    tracing::warn!(group = %group, "progress sweep failed: {error}");
                    continue;
                }
            };
            let ipc = GroupIpc::new(&self.ipc_root, group);
            for run in runs {
                let watermark = self
                    .watermarks
                    .get(run.run_id.as_str())
                    .copied()
                    .unwrap_or((0, 0));
                let events = match ipc.read_progress_after(&run.run_id, watermark) {
                    Ok(events) => events,
                    Err(error) => {
                        tracing::warn!(run_id = %run.run_id, "progress read failed: {error:#}");
                        continue;
                    }
                };
                for event in events {
                    self.watermarks
                        .insert(run.run_id.clone(), (event.ts_unix_ms, event.seq));
                    if let Err(error) = self.store.record_progress(
                        &run.run_id,
                        &event.summary,
                        current_unix_timestamp_ms(),
                    ) {
                        tracing::warn!(run_id = %run.run_id, "progress mirror failed: {error}");
                    }
                    let _ = self.outbound.send(OutboundDelivery {
                        group: self.controller_group.clone(),
                        chat_jid: self.controller_chat_jid.clone(),
                        text: format!("[{}] ↻ {}", run.run_id, event.summary),
                    });
                    forwarded += 1;
                }
                self.collect_steer_ack(&ipc, &run.run_id);
            }
        }
        forwarded
    }

    /// Consumes the agent's ack sentinel and marks the steering event
    /// acked in the store.
    fn collect_steer_ack(&self, ipc: &GroupIpc, run_id: &str) {
        let ack = match ipc.take_steer_ack(run_id) {
            Ok(Some(ack)) => ack,
            Ok(None) => return,
            Err(error) => {
                tracing::warn!(run_id = %run_id, "steer ack poll failed: {error:#}");
                return;
            }
        };
        match self.store.ack_steer(&ack.steer_id, ack.acked_at_unix_ms) {
            Ok(true) => {
                let _ = self.outbound.send(OutboundDelivery {
                    group: self.controller_group.clone(),
                    chat_jid: self.controller_chat_jid.clone(),
                    text: format!("[{run_id}] steering acknowledged"),
                });
            }
            Ok(false) => {
                tracing::info!(run_id = %run_id, "steer '{}' was already resolved", ack.steer_id);
            }
            Err(error) => {
                tracing::warn!(run_id = %run_id, "steer ack record failed: {error}");
            }
        }
    }
}
