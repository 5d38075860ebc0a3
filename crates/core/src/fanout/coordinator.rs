//! Fanout coordinator implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::LimitsConfig;
use crate::error::{ErrorKind, ErrorMapper, FailureCause, RawFailure, Stage, StructuredError};
use crate::gate::{ConcurrencyGate, GateError};
use crate::job::validate::{validate_batch_count, validate_compare_models};
use crate::job::{JobRequest, ValidationError};
use crate::media::slugify_model_id;
use crate::metrics;
use crate::orchestrator::{JobOrchestrator, JobOutcome, OutputTarget};
use crate::resolver::PathSpec;

use super::types::{
    BatchRequest, CompareRequest, FanoutFailure, FanoutItem, FanoutItemOutcome, FanoutKind,
    FanoutResult, FanoutSuccess,
};

/// Runs many pipelines concurrently under a shared gate.
///
/// One item's failure never cancels its siblings; every run waits for all
/// items and reports them by original index.
#[derive(Clone)]
pub struct FanoutCoordinator {
    orchestrator: JobOrchestrator,
    limits: LimitsConfig,
}

impl FanoutCoordinator {
    pub fn new(orchestrator: JobOrchestrator, limits: LimitsConfig) -> Self {
        Self {
            orchestrator,
            limits,
        }
    }

    /// `count` variants of one request, named `{slug}_{n}` (1-based).
    ///
    /// An out-of-range count fails before any pipeline starts.
    pub async fn run_batch(
        &self,
        batch: BatchRequest,
        gate: &ConcurrencyGate,
        cancel: &CancellationToken,
    ) -> Result<FanoutResult, StructuredError> {
        validate_batch_count(batch.count, self.limits.max_batch_count).map_err(rejected)?;

        let slug = slugify_model_id(batch.request.model_id());
        let items = (0..batch.count)
            .map(|i| {
                let hint = format!("{}_{}", slug, i + 1);
                FanoutItem::new(
                    batch.request.clone(),
                    directory_target(&batch.output_dir, batch.repo_dir.as_deref(), &hint),
                )
            })
            .collect();

        Ok(self.run(FanoutKind::Batch, items, gate, cancel).await)
    }

    /// One prompt across models, each named after its model slug.
    pub async fn run_compare(
        &self,
        compare: CompareRequest,
        gate: &ConcurrencyGate,
        cancel: &CancellationToken,
    ) -> Result<FanoutResult, StructuredError> {
        validate_compare_models(&compare.model_ids, self.limits.max_compare_models)
            .map_err(rejected)?;

        let template = JobRequest::new("", compare.prompt).with_parameters(compare.parameters);
        let items = compare
            .model_ids
            .iter()
            .map(|model_id| {
                FanoutItem::new(
                    template.for_model(model_id.as_str()),
                    directory_target(
                        &compare.output_dir,
                        compare.repo_dir.as_deref(),
                        &slugify_model_id(model_id),
                    ),
                )
            })
            .collect();

        Ok(self.run(FanoutKind::Compare, items, gate, cancel).await)
    }

    /// Runs every item to a terminal state.
    ///
    /// Each item takes a gate permit before submitting and gives it back on
    /// completion. Gate waiting counts against the per-item budget.
    /// Cancelling `cancel` cancels every item still running; an item's own
    /// token cancels only that item.
    pub async fn run(
        &self,
        kind: FanoutKind,
        items: Vec<FanoutItem>,
        gate: &ConcurrencyGate,
        cancel: &CancellationToken,
    ) -> FanoutResult {
        let total = items.len();
        let budget = self.orchestrator.config().fanout_pipeline_timeout();
        info!(
            "Starting {} fanout of {} items (gate capacity {})",
            kind.as_str(),
            total,
            gate.capacity()
        );

        let mut pending: BTreeMap<usize, String> = BTreeMap::new();
        let mut tasks = JoinSet::new();
        for (index, item) in items.into_iter().enumerate() {
            pending.insert(index, item.request.model_id().to_string());
            let orchestrator = self.orchestrator.clone();
            let gate = gate.clone();
            let token = cancel.child_token();
            tasks.spawn(async move {
                let model_id = item.request.model_id().to_string();
                let own = item.cancel;
                let pipeline = run_gated(
                    &orchestrator,
                    &gate,
                    item.request,
                    item.target,
                    token.clone(),
                    budget,
                );
                let outcome = match own {
                    Some(own) => {
                        tokio::pin!(pipeline);
                        tokio::select! {
                            outcome = &mut pipeline => outcome,
                            _ = own.cancelled() => {
                                token.cancel();
                                pipeline.await
                            }
                        }
                    }
                    None => pipeline.await,
                };
                (index, model_id, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, model_id, outcome)) => {
                    pending.remove(&index);
                    outcomes.push(item_outcome(index, model_id, outcome));
                }
                Err(e) => warn!("Fanout task ended abnormally: {}", e),
            }
        }

        // Tasks that panicked never reported back.
        for (index, model_id) in pending {
            outcomes.push(FanoutItemOutcome::Failure(FanoutFailure {
                index,
                model_id,
                error: StructuredError::new(
                    ErrorKind::JobFailed,
                    Stage::Observe,
                    "Pipeline task aborted unexpectedly",
                ),
            }));
        }

        for outcome in &outcomes {
            let result = if outcome.is_success() { "success" } else { "failure" };
            metrics::FANOUT_ITEMS
                .with_label_values(&[kind.as_str(), result])
                .inc();
        }

        let result = FanoutResult::from_outcomes(outcomes);
        info!(
            "{} fanout finished: {} succeeded, {} failed",
            kind.as_str(),
            result.successes.len(),
            result.failures.len()
        );
        result
    }
}

/// Runs one pipeline once a gate permit is free.
///
/// `budget` covers the gate wait as well as the pipeline itself.
pub(crate) async fn run_gated(
    orchestrator: &JobOrchestrator,
    gate: &ConcurrencyGate,
    request: JobRequest,
    target: OutputTarget,
    cancel: CancellationToken,
    budget: Duration,
) -> JobOutcome {
    let deadline = Instant::now() + budget;

    let acquired = tokio::select! {
        biased;
        acquired = gate.acquire(&cancel) => Some(acquired),
        _ = sleep_until(deadline) => None,
    };
    let mut permit = match acquired {
        Some(Ok(permit)) => permit,
        Some(Err(GateError::Cancelled)) => {
            return JobOutcome::Cancelled {
                request_id: None,
                warning: None,
            }
        }
        Some(Err(GateError::Closed)) => {
            return JobOutcome::Cancelled {
                request_id: None,
                warning: Some("Concurrency gate closed".to_string()),
            }
        }
        None => {
            return JobOutcome::TimedOut {
                request_id: None,
                error: ErrorMapper::map(RawFailure::new(
                    Stage::Prepare,
                    FailureCause::TimedOut {
                        budget_secs: budget.as_secs(),
                    },
                )),
            }
        }
    };

    let outcome = orchestrator
        .run_until(request, target, cancel, deadline)
        .await;
    permit.release();
    outcome
}

fn item_outcome(index: usize, model_id: String, outcome: JobOutcome) -> FanoutItemOutcome {
    match outcome.into_result() {
        Ok(artifact) => FanoutItemOutcome::Success(FanoutSuccess {
            index,
            model_id,
            output_path: artifact.output_path.clone(),
            artifact,
        }),
        Err(error) => FanoutItemOutcome::Failure(FanoutFailure {
            index,
            model_id,
            error,
        }),
    }
}

fn directory_target(
    output_dir: &std::path::Path,
    repo_dir: Option<&std::path::Path>,
    hint: &str,
) -> OutputTarget {
    let target = OutputTarget::new(PathSpec::in_dir(output_dir, hint));
    match repo_dir {
        Some(repo_dir) => target.with_copy(PathSpec::in_dir(repo_dir, hint)),
        None => target,
    }
}

fn rejected(error: ValidationError) -> StructuredError {
    ErrorMapper::map(RawFailure::new(Stage::Prepare, FailureCause::Validation(error)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    use crate::orchestrator::OrchestratorConfig;
    use crate::placer::FsPlacer;
    use crate::resolver::PathResolver;
    use crate::testing::{fixtures, MockProvider};

    fn coordinator(temp: &TempDir, provider: &MockProvider) -> FanoutCoordinator {
        let orchestrator = JobOrchestrator::new(
            Arc::new(provider.clone()),
            Arc::new(FsPlacer::with_defaults()),
            PathResolver::new(temp.path()).unwrap(),
            OrchestratorConfig::default(),
        );
        FanoutCoordinator::new(orchestrator, LimitsConfig::default())
    }

    #[tokio::test]
    async fn test_batch_count_rejected_before_launch() {
        let temp = TempDir::new().unwrap();
        let provider = MockProvider::new();
        let coordinator = coordinator(&temp, &provider);

        for count in [0, 11] {
            let err = coordinator
                .run_batch(
                    BatchRequest {
                        request: fixtures::request(fixtures::MODEL_ID),
                        count,
                        output_dir: "out".into(),
                        repo_dir: None,
                    },
                    &ConcurrencyGate::new(2),
                    &CancellationToken::new(),
                )
                .await
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::Validation);
        }
        assert!(provider.submits().await.is_empty());
    }

    #[tokio::test]
    async fn test_compare_bounds_rejected_before_launch() {
        let temp = TempDir::new().unwrap();
        let provider = MockProvider::new();
        let coordinator = coordinator(&temp, &provider);

        let compare = |model_ids: Vec<String>| CompareRequest {
            model_ids,
            prompt: "fox".to_string(),
            parameters: Default::default(),
            output_dir: "out".into(),
            repo_dir: None,
        };
        let gate = ConcurrencyGate::new(2);
        let cancel = CancellationToken::new();

        let one = coordinator
            .run_compare(compare(vec!["a/one".into()]), &gate, &cancel)
            .await;
        assert_eq!(one.unwrap_err().kind, ErrorKind::Validation);

        let seven: Vec<String> = (0..7).map(|i| format!("a/m{}", i)).collect();
        let many = coordinator.run_compare(compare(seven), &gate, &cancel).await;
        assert_eq!(many.unwrap_err().kind, ErrorKind::Validation);

        assert!(provider.submits().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_naming_and_copies() {
        let temp = TempDir::new().unwrap();
        let provider = MockProvider::new();
        let coordinator = coordinator(&temp, &provider);

        let result = coordinator
            .run_batch(
                BatchRequest {
                    request: fixtures::request("fal-ai/flux/dev"),
                    count: 2,
                    output_dir: "out".into(),
                    repo_dir: Some("repo/assets".into()),
                },
                &ConcurrencyGate::new(4),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.all_succeeded());
        let root = temp.path().canonicalize().unwrap();
        let names: Vec<_> = result.successes.iter().map(|s| s.output_path.clone()).collect();
        assert_eq!(
            names,
            vec![
                root.join("out/fal-ai-flux-dev_1.png"),
                root.join("out/fal-ai-flux-dev_2.png")
            ]
        );
        assert_eq!(
            result.successes[1].artifact.copy_path,
            Some(root.join("repo/assets/fal-ai-flux-dev_2.png"))
        );
    }

    #[tokio::test]
    async fn test_pre_cancelled_fanout_cancels_every_item() {
        let temp = TempDir::new().unwrap();
        let provider = MockProvider::new();
        let coordinator = coordinator(&temp, &provider);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let items = (0..3)
            .map(|i| {
                FanoutItem::new(
                    fixtures::request(fixtures::MODEL_ID),
                    OutputTarget::new(PathSpec::in_dir("out", format!("item_{}", i))),
                )
            })
            .collect();
        let result = coordinator
            .run(FanoutKind::Batch, items, &ConcurrencyGate::new(1), &cancel)
            .await;

        assert_eq!(result.failures.len(), 3);
        assert!(result.failures.iter().all(|f| f.error.kind == ErrorKind::Cancelled));
        assert!(provider.submits().await.is_empty());
    }
}
