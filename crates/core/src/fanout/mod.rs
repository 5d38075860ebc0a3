//! Batch and compare fanout over the job orchestrator.

mod coordinator;
mod types;

pub use coordinator::FanoutCoordinator;
pub(crate) use coordinator::run_gated;
pub use types::{
    BatchRequest, CompareRequest, FanoutFailure, FanoutItem, FanoutItemOutcome, FanoutKind,
    FanoutResult, FanoutSuccess,
};
