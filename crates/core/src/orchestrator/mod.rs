//! Job orchestrator for single generation pipelines.
//!
//! One [`JobOrchestrator::run`] call takes a request from submission to a
//! terminal [`JobOutcome`]:
//! - **Observation**: status stream first, polling fallback after a silent window
//! - **Artifact**: streamed into a staging file, renamed into place
//! - **Failures**: returned as data, classified by the error mapper

mod config;
mod observer;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use observer::{ObserveMode, StatusObserver, Verdict};
pub use runner::{JobOrchestrator, ProgressSender};
pub use types::{GeneratedArtifact, JobOutcome, JobProgress, OutputTarget};
