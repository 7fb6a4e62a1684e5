//! Host process: lane classification, dispatch authorization, the router
//! between chat, queues, and the dispatch validator, plus the supervisor
//! that wires the whole tier together.

pub mod channel;
pub mod config;
pub mod lane;
pub mod progress;
pub mod router;
pub mod supervisor;

pub use channel::{ChatChannel, InboundChat, StdioChatChannel};
pub use config::HostConfig;
pub use lane::{evaluate_dispatch_authorization, DispatchAuthorization, LaneClass};
pub use progress::ProgressForwarder;
pub use router::{GroupRegistration, HostRouter, RouteOutcome};
pub use supervisor::HostSupervisor;
