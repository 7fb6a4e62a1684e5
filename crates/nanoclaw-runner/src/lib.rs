//! Container runner: spawns the per-group container process, supervises it
//! with three timers, parses framed stdout, and guarantees teardown on
//! every exit path.
//!
//! The runner is the sole owner of the child process handle, so the
//! cooperative close path (the `_close` IPC sentinel) and the forced kill
//! path can never race each other.

mod framing;
mod runner;
mod stdin;

pub use framing::{
    FrameScanEvent, FrameScanner, FrameStatus, OutputFrame, AGENT_STDERR_PREFIX,
    HEARTBEAT_STDERR_TOKEN, OUTPUT_END_MARKER, OUTPUT_START_MARKER,
};
pub use runner::{
    engine_invocation, ContainerExitReason, ContainerGate, ContainerLaunchSpec, ContainerLauncher,
    ContainerRunOutcome, ContainerRunnerConfig, MountSpec, NoopRunHooks, ProcessContainerRunner,
    RunLifecycleHooks,
};
pub use stdin::ContainerStdinPayload;
