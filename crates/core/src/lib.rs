pub mod config;
pub mod error;
pub mod fanout;
pub mod gate;
pub mod job;
pub mod logging;
pub mod media;
pub mod metrics;
pub mod orchestrator;
pub mod placer;
pub mod provider;
pub mod resolver;
pub mod service;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, LimitsConfig,
    SanitizedConfig,
};
pub use error::{ErrorKind, ErrorMapper, FailureCause, RawFailure, Stage, StructuredError};
pub use fanout::{
    BatchRequest, CompareRequest, FanoutCoordinator, FanoutFailure, FanoutItem, FanoutKind,
    FanoutResult, FanoutSuccess,
};
pub use gate::{ConcurrencyGate, GateError, GatePermit, GateStatus};
pub use job::{JobHandle, JobRequest, JobResult, JobState, Phase, StatusEvent, ValidationError};
pub use media::MediaType;
pub use orchestrator::{
    GeneratedArtifact, JobOrchestrator, JobOutcome, JobProgress, OrchestratorConfig, OutputTarget,
};
pub use placer::{FsPlacer, Placer, PlacerConfig, PlacerError};
pub use provider::{FalClient, ProviderClient, ProviderError};
pub use resolver::{PathError, PathPlan, PathResolver, PathSpec};
pub use service::{GenerationService, ServiceError};
