//! Per-group FIFO queue workers.
//!
//! The durable message table is the queue; each registered group gets
//! exactly one worker task that pops by `(group, ingest_seq > cursor)`,
//! coalesces pending messages into one turn, launches the container, and
//! advances the cursor atomically with successful frame delivery. Delivery
//! failure (zero frames) leaves the cursor in place and retries with
//! bounded exponential backoff; exhausted batches land in the dead-letter
//! table, never on the floor.

mod worker;

pub use worker::{
    GroupQueue, GroupQueueHandle, OutboundDelivery, QueueConfig, WorkerLaunchTemplate,
    FAILURE_REASON_SPAWN_BEFORE_RUNNING,
};
