use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use nanoclaw_host::{GroupRegistration, HostConfig, HostSupervisor, StdioChatChannel};

#[derive(Debug, Parser)]
#[command(name = "nanoclaw-host", about = "Multi-tier agent orchestration host")]
struct Cli {
    /// Group folders to register; lane class is derived from the prefix.
    /// `main` is always registered.
    #[arg(long = "group", value_name = "FOLDER")]
    groups: Vec<String>,

    #[arg(long, env = "NANOCLAW_STATE_DIR", default_value = ".nanoclaw")]
    state_dir: PathBuf,

    /// Shared IPC root; defaults to `<state-dir>/ipc`.
    #[arg(long, env = "NANOCLAW_IPC_ROOT")]
    ipc_root: Option<PathBuf>,

    #[arg(long, env = "NANOCLAW_CONTAINER_ENGINE", default_value = "docker")]
    container_engine: String,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = HostConfig::from_env();
    config.ipc_root = cli
        .ipc_root
        .unwrap_or_else(|| cli.state_dir.join("ipc"));
    config.state_dir = cli.state_dir;
    config.container_engine = cli.container_engine;

    let mut groups = cli.groups;
    if !groups.iter().any(|group| group == "main") {
        groups.insert(0, "main".to_string());
    }
    let registrations: Vec<GroupRegistration> = groups
        .into_iter()
        .map(GroupRegistration::for_folder)
        .collect();

    let supervisor = HostSupervisor::start(&config, &registrations)?;
    tracing::info!("nanoclaw host started with {} groups", registrations.len());
    supervisor.run(StdioChatChannel::new("main")).await
}
