//! Caller-facing facade over the orchestrator, fanout and gate.
//!
//! One [`GenerationService`] owns the shared [`ConcurrencyGate`]: single jobs,
//! batch items and compare items all draw from the same permits.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{validate_config, Config, ConfigError, LimitsConfig};
use crate::error::{ErrorMapper, FailureCause, RawFailure, Stage, StructuredError};
use crate::fanout::{run_gated, BatchRequest, CompareRequest, FanoutCoordinator, FanoutResult};
use crate::gate::{ConcurrencyGate, GateStatus};
use crate::job::validate::{validate_model_id, validate_prompt};
use crate::job::{JobHandle, JobRequest, StatusEvent, ValidationError};
use crate::orchestrator::{JobOrchestrator, JobOutcome, OutputTarget, ProgressSender};
use crate::placer::{FsPlacer, Placer};
use crate::provider::{FalClient, ProviderClient};
use crate::resolver::{PathError, PathResolver};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid output root: {0}")]
    OutputRoot(#[from] PathError),
}

/// Entry point for generation requests.
#[derive(Clone)]
pub struct GenerationService {
    provider: Arc<dyn ProviderClient>,
    orchestrator: JobOrchestrator,
    fanout: FanoutCoordinator,
    gate: ConcurrencyGate,
    limits: LimitsConfig,
}

impl GenerationService {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        placer: Arc<dyn Placer>,
        resolver: PathResolver,
        config: &Config,
    ) -> Self {
        let orchestrator = JobOrchestrator::new(
            Arc::clone(&provider),
            placer,
            resolver,
            config.orchestrator.clone(),
        );
        Self {
            provider,
            fanout: FanoutCoordinator::new(orchestrator.clone(), config.limits.clone()),
            orchestrator,
            gate: ConcurrencyGate::new(config.limits.max_concurrent_jobs),
            limits: config.limits.clone(),
        }
    }

    /// Builds the HTTP provider, filesystem placer and resolver from config.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        validate_config(config)?;
        let provider = FalClient::new(&config.provider, config.orchestrator.queue_start_timeout())?;
        let resolver = PathResolver::new(&config.output.allowed_root)?;
        let placer = FsPlacer::new(config.placer.clone());
        info!(
            "Generation service ready (root {}, {} concurrent jobs)",
            resolver.allowed_root().display(),
            config.limits.max_concurrent_jobs
        );
        Ok(Self::new(
            Arc::new(provider),
            Arc::new(placer),
            resolver,
            config,
        ))
    }

    /// Sends pipeline progress to `sender` for every job started afterwards.
    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.orchestrator = self.orchestrator.with_progress(sender);
        self.fanout = FanoutCoordinator::new(self.orchestrator.clone(), self.limits.clone());
        self
    }

    pub fn gate_status(&self) -> GateStatus {
        self.gate.status()
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Runs one job through the shared gate.
    ///
    /// Invalid input is rejected before anything is submitted. Every other
    /// failure is reported inside the returned [`JobOutcome`].
    pub async fn generate(
        &self,
        request: JobRequest,
        target: OutputTarget,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, StructuredError> {
        self.validate_request(&request)?;
        let budget = self.orchestrator.config().pipeline_timeout();
        Ok(run_gated(
            &self.orchestrator,
            &self.gate,
            request,
            target,
            cancel.clone(),
            budget,
        )
        .await)
    }

    pub async fn generate_batch(
        &self,
        batch: BatchRequest,
        cancel: &CancellationToken,
    ) -> Result<FanoutResult, StructuredError> {
        self.validate_request(&batch.request)?;
        self.fanout.run_batch(batch, &self.gate, cancel).await
    }

    pub async fn generate_compare(
        &self,
        compare: CompareRequest,
        cancel: &CancellationToken,
    ) -> Result<FanoutResult, StructuredError> {
        validate_prompt(&compare.prompt, self.limits.max_prompt_length).map_err(rejected)?;
        self.fanout.run_compare(compare, &self.gate, cancel).await
    }

    /// One status poll for a job submitted earlier.
    pub async fn job_status(
        &self,
        model_id: &str,
        request_id: &str,
    ) -> Result<StatusEvent, StructuredError> {
        validate_model_id(model_id).map_err(rejected)?;
        let handle = JobHandle::submitted(request_id, model_id);
        self.provider
            .poll_status(&handle)
            .await
            .map_err(|e| ErrorMapper::map(RawFailure::provider(Stage::Observe, e)))
    }

    /// Asks the provider to cancel a job submitted earlier.
    pub async fn cancel_job(
        &self,
        model_id: &str,
        request_id: &str,
    ) -> Result<(), StructuredError> {
        validate_model_id(model_id).map_err(rejected)?;
        let handle = JobHandle::submitted(request_id, model_id);
        self.provider
            .cancel(&handle)
            .await
            .map_err(|e| ErrorMapper::map(RawFailure::provider(Stage::Observe, e)))?;
        info!("Cancelled job {} ({})", request_id, model_id);
        Ok(())
    }

    fn validate_request(&self, request: &JobRequest) -> Result<(), StructuredError> {
        validate_model_id(request.model_id()).map_err(rejected)?;
        validate_prompt(request.prompt(), self.limits.max_prompt_length).map_err(rejected)
    }
}

fn rejected(error: ValidationError) -> StructuredError {
    ErrorMapper::map(RawFailure::new(Stage::Prepare, FailureCause::Validation(error)))
}
