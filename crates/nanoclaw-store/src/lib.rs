//! Durable relational store for the orchestration host.
//!
//! Owns every durable row: ingested messages with their monotonic sequence,
//! per-group cursors, worker run records and their state machine, steering
//! events, and dead-lettered batches. All writes go through one connection
//! behind a mutex, so every transition is single-writer serializable.

mod run_types;
mod store;

pub use run_types::{
    CompletionArtifacts, ContextIntent, CreateRunOutcome, DeadLetterRecord, MessageRecord,
    NewMessage, NewWorkerRun, RunState, SessionResumeStatus, SteerEventRecord, SteerStatus,
    TransitionOutcome, WorkerRunRecord,
};
pub use store::{Store, StoreError};
