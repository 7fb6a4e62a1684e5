//! Dispatch validation, completion-contract enforcement, and the run
//! lifecycle glue between the two.
//!
//! A controller lane's agent emits a JSON dispatch payload targeted at a
//! worker group; this crate validates the payload field by field (each rule
//! carries a stable error code), records the run, and later scans the
//! worker container's output for a `<completion>` block whose predicates
//! decide the run's terminal state.

mod completion;
mod lifecycle;
mod payload;

pub use completion::{
    evaluate_completion, extract_completion_block, BrowserEvidence, CompletionReport,
    ContractViolation, NO_CODE_RUN_ID_PREFIXES, SHA_PLACEHOLDERS,
};
pub use lifecycle::{
    accept_dispatch, finalize_run, new_run_from_payload, DispatchOutcome, RunResolution,
    FAILURE_REASON_CONTAINER_CRASH,
};
pub use payload::{
    extract_dispatch_json, parse_dispatch_payload, validate_dispatch_shape, DispatchPayload,
    DispatchValidationError, OutputContract, MIN_COMPLETION_FIELDS, TASK_TYPES,
};
