use std::path::PathBuf;
use std::time::Duration;

use nanoclaw_queue::QueueConfig;
use nanoclaw_runner::ContainerRunnerConfig;

pub const ENV_NO_OUTPUT_TIMEOUT: &str = "CONTAINER_NO_OUTPUT_TIMEOUT";
pub const ENV_IDLE_TIMEOUT: &str = "IDLE_TIMEOUT";
pub const ENV_HARD_TIMEOUT: &str = "CONTAINER_TIMEOUT";
pub const ENV_MAX_RETRIES: &str = "MAX_RETRIES";
pub const ENV_MAX_CONCURRENT_CONTAINERS: &str = "MAX_CONCURRENT_CONTAINERS";
pub const ENV_WORKER_CONTAINER_IMAGE: &str = "WORKER_CONTAINER_IMAGE";
pub const ENV_RELOAD_GLOBAL_INSTRUCTIONS: &str = "NANOCLAW_RELOAD_GLOBAL_INSTRUCTIONS";

const DEFAULT_NO_OUTPUT_TIMEOUT_MS: u64 = 720_000;
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_HARD_TIMEOUT_MS: u64 = 1_800_000;
/// The hard timeout is a safety ceiling and may not be configured below
/// this floor.
const HARD_TIMEOUT_FLOOR_MS: u64 = 1_800_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_MAX_CONCURRENT_CONTAINERS: usize = 4;
const DEFAULT_WORKER_IMAGE: &str = "nanoclaw-worker:latest";

/// Host-level configuration, defaults overridden from the process
/// environment. Invalid numeric values fall back to the default with a
/// warning rather than refusing to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub state_dir: PathBuf,
    pub ipc_root: PathBuf,
    pub container_engine: String,
    pub worker_container_image: String,
    pub no_output_timeout: Duration,
    pub idle_timeout: Duration,
    pub hard_timeout: Duration,
    pub max_retries: u32,
    pub max_concurrent_containers: usize,
    /// Whether non-main lanes re-read the global instruction file; the
    /// main lane never does, the SDK already injects it there.
    pub reload_global_instructions_for_non_main_lanes: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".nanoclaw"),
            ipc_root: PathBuf::from(".nanoclaw/ipc"),
            container_engine: "docker".to_string(),
            worker_container_image: DEFAULT_WORKER_IMAGE.to_string(),
            no_output_timeout: Duration::from_millis(DEFAULT_NO_OUTPUT_TIMEOUT_MS),
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            hard_timeout: Duration::from_millis(DEFAULT_HARD_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            max_concurrent_containers: DEFAULT_MAX_CONCURRENT_CONTAINERS,
            reload_global_instructions_for_non_main_lanes: true,
        }
    }
}

impl HostConfig {
    /// Reads the environment overrides on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.no_output_timeout = Duration::from_millis(env_u64(
            ENV_NO_OUTPUT_TIMEOUT,
            std::env::var(ENV_NO_OUTPUT_TIMEOUT).ok().as_deref(),
            DEFAULT_NO_OUTPUT_TIMEOUT_MS,
        ));
        config.idle_timeout = Duration::from_millis(env_u64(
            ENV_IDLE_TIMEOUT,
            std::env::var(ENV_IDLE_TIMEOUT).ok().as_deref(),
            DEFAULT_IDLE_TIMEOUT_MS,
        ));
        config.hard_timeout = Duration::from_millis(
            env_u64(
                ENV_HARD_TIMEOUT,
                std::env::var(ENV_HARD_TIMEOUT).ok().as_deref(),
                DEFAULT_HARD_TIMEOUT_MS,
            )
            .max(HARD_TIMEOUT_FLOOR_MS),
        );
        config.max_retries = env_u64(
            ENV_MAX_RETRIES,
            std::env::var(ENV_MAX_RETRIES).ok().as_deref(),
            u64::from(DEFAULT_MAX_RETRIES),
        ) as u32;
        config.max_concurrent_containers = env_u64(
            ENV_MAX_CONCURRENT_CONTAINERS,
            std::env::var(ENV_MAX_CONCURRENT_CONTAINERS).ok().as_deref(),
            DEFAULT_MAX_CONCURRENT_CONTAINERS as u64,
        )
        .max(1) as usize;
        if let Ok(image) = std::env::var(ENV_WORKER_CONTAINER_IMAGE) {
            if !image.trim().is_empty() {
                config.worker_container_image = image;
            }
        }
        if let Ok(flag) = std::env::var(ENV_RELOAD_GLOBAL_INSTRUCTIONS) {
            config.reload_global_instructions_for_non_main_lanes = flag.trim() != "0";
        }
        config
    }

    pub fn runner_config(&self) -> ContainerRunnerConfig {
        ContainerRunnerConfig {
            no_output_timeout: self.no_output_timeout,
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
            ..ContainerRunnerConfig::default()
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_retries: self.max_retries,
            ..QueueConfig::default()
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.state_dir.join("nanoclaw.sqlite")
    }
}

fn env_u64(name: &str, raw: Option<&str>, default: u64) -> u64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!("ignoring invalid {name}='{raw}', using default {default}");
            default
        }
    }
}
