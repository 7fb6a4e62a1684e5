use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use nanoclaw_ipc::GroupIpc;
use nanoclaw_queue::{GroupQueue, GroupQueueHandle, OutboundDelivery, WorkerLaunchTemplate};
use nanoclaw_runner::{engine_invocation, ContainerGate, MountSpec, ProcessContainerRunner};
use nanoclaw_store::Store;

use crate::channel::ChatChannel;
use crate::config::HostConfig;
use crate::lane::LaneClass;
use crate::progress::ProgressForwarder;
use crate::router::{GroupRegistration, HostRouter, RouteOutcome};

const PROGRESS_POLL_INTERVAL: Duration = Duration::from_secs(2);
const CONTAINER_GROUP_MOUNT: &str = "/workspace/group";
const CONTAINER_IPC_ROOT: &str = "/workspace/ipc";

/// Owns the store, the queue workers, and the event loop between the chat
/// channel, the router, and the progress poller.
pub struct HostSupervisor {
    config: HostConfig,
    store: Store,
    router: HostRouter,
    registrations: Vec<GroupRegistration>,
    handles: BTreeMap<String, GroupQueueHandle>,
    worker_tasks: Vec<JoinHandle<()>>,
    outbound_tx: mpsc::UnboundedSender<OutboundDelivery>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundDelivery>,
}

impl HostSupervisor {
    /// Opens the store and spawns one queue worker per registered group.
    pub fn start(config: &HostConfig, registrations: &[GroupRegistration]) -> Result<Self> {
        std::fs::create_dir_all(&config.state_dir).with_context(|| {
            format!("failed to create state dir {}", config.state_dir.display())
        })?;
        let store = Store::open(&config.store_path()).context("failed to open store")?;
        let router = HostRouter::new(store.clone(), registrations);
        let gate = ContainerGate::new(config.max_concurrent_containers);
        let runner = Arc::new(ProcessContainerRunner::new(config.runner_config(), gate));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let mut handles = BTreeMap::new();
        let mut worker_tasks = Vec::new();
        for registration in registrations {
            let ipc = GroupIpc::new(&config.ipc_root, &registration.group_folder);
            let (queue, handle) = GroupQueue::new(
                registration.group_folder.clone(),
                store.clone(),
                ipc,
                runner.clone(),
                launch_template_for(config, registration),
                config.queue_config(),
                outbound_tx.clone(),
            );
            handles.insert(registration.group_folder.clone(), handle);
            worker_tasks.push(tokio::spawn(queue.run_worker()));
            tracing::info!(
                group = %registration.group_folder,
                lane = registration.lane.as_str(),
                "registered group queue"
            );
        }

        Ok(Self {
            config: config.clone(),
            store,
            router,
            registrations: registrations.to_vec(),
            handles,
            worker_tasks,
            outbound_tx,
            outbound_rx,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn router(&self) -> &HostRouter {
        &self.router
    }

    pub fn wake(&self, group: &str) {
        if let Some(handle) = self.handles.get(group) {
            handle.wake();
        }
    }

    /// Administrative cancel: drains the group's queue and asks the live
    /// container to finish via the close sentinel.
    pub fn cancel(&self, group: &str) {
        if let Some(handle) = self.handles.get(group) {
            handle.cancel();
        }
    }

    /// Injects a steering message into an in-flight worker run. The agent
    /// polls the steer file, injects it into the live turn, and acks; the
    /// progress sweep collects the ack into the store.
    pub fn steer_run(&self, from_group: &str, run_id: &str, message: &str) -> Result<String> {
        let run = self.store.run(run_id).context("steer target run not found")?;
        if run.state != nanoclaw_store::RunState::Running {
            anyhow::bail!(
                "run '{run_id}' is {} and cannot be steered",
                run.state.as_str()
            );
        }
        let sent_at = nanoclaw_core::current_unix_timestamp_ms();
        let steer_id = format!("steer-{run_id}-{sent_at}");
        self.store
            .record_steer(&nanoclaw_store::SteerEventRecord {
                steer_id: steer_id.clone(),
                run_id: run_id.to_string(),
                from_group: from_group.to_string(),
                message: message.to_string(),
                sent_at_unix_ms: sent_at,
                acked_at_unix_ms: None,
                status: nanoclaw_store::SteerStatus::Pending,
            })
            .context("failed to record steering event")?;
        GroupIpc::new(&self.config.ipc_root, &run.target_group)
            .write_steer(&nanoclaw_ipc::SteerFile {
                steer_id: steer_id.clone(),
                run_id: run_id.to_string(),
                from_group: from_group.to_string(),
                message: message.to_string(),
                sent_at_unix_ms: sent_at,
            })
            .context("failed to write steer file")?;
        Ok(steer_id)
    }

    /// Event loop: chat in, frames out, dispatch extraction on controller
    /// output, 2-second progress sweeps. Returns when the channel closes.
    pub async fn run<C: ChatChannel>(mut self, mut channel: C) -> Result<()> {
        let worker_groups: Vec<String> = self
            .registrations
            .iter()
            .filter(|registration| registration.lane == LaneClass::Worker)
            .map(|registration| registration.group_folder.clone())
            .collect();
        let controller_group = self
            .registrations
            .iter()
            .find(|registration| registration.lane == LaneClass::ControllerDeveloper)
            .map(|registration| registration.group_folder.clone())
            .unwrap_or_else(|| "main".to_string());
        let mut progress = ProgressForwarder::new(
            self.store.clone(),
            self.config.ipc_root.clone(),
            controller_group,
            "controller@host",
            self.outbound_tx.clone(),
        );
        let mut progress_tick = tokio::time::interval(PROGRESS_POLL_INTERVAL);
        progress_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                inbound = channel.next_inbound() => {
                    let Some(inbound) = inbound else {
                        tracing::info!("chat channel closed; shutting down");
                        break;
                    };
                    match self.router.ingest_inbound(
                        &inbound.chat_jid,
                        &inbound.group_folder,
                        &inbound.body,
                    ) {
                        Ok((group, _seq)) => self.wake(&group),
                        Err(error) => tracing::error!("ingest failed: {error:#}"),
                    }
                }
                Some(delivery) = self.outbound_rx.recv() => {
                    self.route_agent_delivery(&delivery);
                    if let Err(error) = channel.send_outbound(&delivery).await {
                        tracing::warn!("outbound send failed: {error:#}");
                    }
                }
                _ = progress_tick.tick() => {
                    progress.poll_once(&worker_groups);
                }
            }
        }

        for task in &self.worker_tasks {
            task.abort();
        }
        Ok(())
    }

    /// Dispatch JSON emitted by a controller-capable lane is validated and
    /// routed into the target worker queue.
    fn route_agent_delivery(&self, delivery: &OutboundDelivery) {
        let dispatch_capable = matches!(
            self.router.lane_of(&delivery.group),
            Some(LaneClass::Main | LaneClass::ControllerDeveloper)
        );
        if !dispatch_capable {
            return;
        }
        match self
            .router
            .handle_agent_output(&delivery.group, &delivery.chat_jid, &delivery.text)
        {
            Ok(RouteOutcome::DispatchAccepted { target_group, .. }) => {
                self.wake(&target_group);
            }
            Ok(_) => {}
            Err(error) => {
                tracing::error!(group = %delivery.group, "dispatch routing failed: {error:#}");
            }
        }
    }
}

fn launch_template_for(config: &HostConfig, registration: &GroupRegistration) -> WorkerLaunchTemplate {
    let group = registration.group_folder.as_str();
    let mounts = vec![
        MountSpec {
            host_path: config
                .state_dir
                .join("groups")
                .join(group)
                .display()
                .to_string(),
            container_path: CONTAINER_GROUP_MOUNT.to_string(),
            read_only: false,
        },
        MountSpec {
            host_path: config.ipc_root.join(group).display().to_string(),
            container_path: format!("{CONTAINER_IPC_ROOT}/{group}"),
            read_only: false,
        },
    ];
    let mut container_env = BTreeMap::new();
    container_env.insert("NANOCLAW_IPC_ROOT".to_string(), CONTAINER_IPC_ROOT.to_string());
    container_env.insert(
        "NANOCLAW_CONVERSATIONS_DIR".to_string(),
        format!("{CONTAINER_GROUP_MOUNT}/conversations"),
    );
    let (command, args) = engine_invocation(
        &config.container_engine,
        &config.worker_container_image,
        &mounts,
        &container_env,
    );
    WorkerLaunchTemplate {
        command,
        args,
        env: BTreeMap::new(),
        secrets: BTreeMap::new(),
        is_main: registration.lane == LaneClass::Main,
        assistant_name: Some("nanoclaw".to_string()),
        reload_global_instructions: config.reload_global_instructions_for_non_main_lanes,
    }
}
