//! Filesystem IPC surface between the host and an in-container agent.
//!
//! Each group owns a directory tree `<ipc_root>/<group>/` with three
//! subtrees: `input/` (host-written message files plus the `_close`
//! sentinel), `progress/<run_id>/` (container-written event files), and
//! `steer/` (host-written steer file, container-written ack). Every file is
//! written by exactly one party and consumed (unlinked) by the other, so
//! `ls` on any subtree shows live queue depth.
//!
//! Filesystem errors on this surface are non-fatal for a turn: callers log
//! and retry on the next poll tick.

mod events;
mod surface;

pub use events::{
    InputMessage, ProgressFileEvent, SteerAckFile, SteerFile, CLOSE_SENTINEL_FILE, INPUT_DIR,
    PROGRESS_DIR, STEER_ACK_SUFFIX, STEER_DIR,
};
pub use surface::GroupIpc;
