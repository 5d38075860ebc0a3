//! Job orchestrator implementation.
//!
//! Drives one job through its lifecycle:
//! - Prepare: containment check of every output target
//! - Submit: one provider submission, never repeated
//! - Observe: status stream first, polling fallback
//! - Fetch / Download: result reference, then artifact bytes into a staging file
//! - Persist / Copy: collision-free final name, optional secondary copy
//!
//! Cancellation and the wall-clock budget interrupt everything up to the end
//! of the download. Persisting is local and runs to completion, so a
//! `Cancelled` or `TimedOut` outcome never leaves a final-named file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ErrorMapper, FailureCause, RawFailure, Stage};
use crate::job::{JobHandle, JobRequest, JobResult, JobState, StatusEvent};
use crate::media::detect_type_and_ext;
use crate::metrics;
use crate::placer::{Placer, PlacerError, StagedFile};
use crate::provider::{ProviderClient, ProviderError};
use crate::resolver::{PathPlan, PathResolver, PathSpec};

use super::config::OrchestratorConfig;
use super::observer::{StatusObserver, Verdict};
use super::types::{GeneratedArtifact, JobOutcome, JobProgress, OutputTarget};

/// Attempts at finding a free final name when a commit loses a race.
const PLACE_ATTEMPTS: usize = 3;

/// Downloaded bytes emitted between progress notifications.
const PROGRESS_STEP_BYTES: u64 = 1024 * 1024;

/// Sender half for [`JobProgress`] notifications.
pub type ProgressSender = mpsc::UnboundedSender<JobProgress>;

/// An artifact fully downloaded into its staging file.
struct Downloaded {
    staged: StagedFile,
    result: JobResult,
    extension: Option<String>,
}

/// Why the interruptible part of a pipeline stopped early.
enum Interrupt {
    Cancelled,
    TimedOut,
}

/// Runs single job pipelines. Cheap to clone; clones share collaborators.
#[derive(Clone)]
pub struct JobOrchestrator {
    provider: Arc<dyn ProviderClient>,
    placer: Arc<dyn Placer>,
    resolver: PathResolver,
    config: OrchestratorConfig,
    progress: Option<ProgressSender>,
}

impl JobOrchestrator {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        placer: Arc<dyn Placer>,
        resolver: PathResolver,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            placer,
            resolver,
            config,
            progress: None,
        }
    }

    /// Sends progress notifications to `sender`. A dropped receiver is ignored.
    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Runs a pipeline under the single-job budget.
    pub async fn run(
        &self,
        request: JobRequest,
        target: OutputTarget,
        cancel: CancellationToken,
    ) -> JobOutcome {
        let deadline = Instant::now() + self.config.pipeline_timeout();
        self.run_until(request, target, cancel, deadline).await
    }

    /// Runs a pipeline that must finish by `deadline`.
    pub async fn run_until(
        &self,
        request: JobRequest,
        target: OutputTarget,
        cancel: CancellationToken,
        deadline: Instant,
    ) -> JobOutcome {
        let started = std::time::Instant::now();
        let budget = deadline.saturating_duration_since(Instant::now());

        let outcome = self
            .execute(&request, &target, &cancel, deadline, budget)
            .await;

        let elapsed = started.elapsed();
        metrics::JOBS_TOTAL
            .with_label_values(&[outcome.as_str()])
            .inc();
        metrics::JOB_DURATION
            .with_label_values(&[outcome.as_str()])
            .observe(elapsed.as_secs_f64());

        match &outcome {
            JobOutcome::Succeeded(artifact) => {
                info!(
                    "Job {} ({}) succeeded in {:.1}s: {}",
                    artifact.request_id,
                    artifact.model_id,
                    elapsed.as_secs_f64(),
                    artifact.output_path.display()
                );
                self.emit(JobProgress::Completed {
                    request_id: artifact.request_id.clone(),
                    output_path: artifact.output_path.clone(),
                });
            }
            JobOutcome::Cancelled { request_id, .. } => {
                info!(
                    "Job {} ({}) cancelled",
                    request_id.as_deref().unwrap_or("<unsubmitted>"),
                    request.model_id()
                );
            }
            JobOutcome::Failed { request_id, error }
            | JobOutcome::TimedOut { request_id, error } => {
                info!(
                    "Job {} ({}) {} [{}]: {}",
                    request_id.as_deref().unwrap_or("<unsubmitted>"),
                    request.model_id(),
                    outcome.as_str(),
                    error.tag(),
                    error.message
                );
                self.emit(JobProgress::Failed {
                    request_id: request_id.clone(),
                    code: error.code().to_string(),
                    message: error.message.clone(),
                });
            }
        }

        outcome
    }

    async fn execute(
        &self,
        request: &JobRequest,
        target: &OutputTarget,
        cancel: &CancellationToken,
        deadline: Instant,
        budget: Duration,
    ) -> JobOutcome {
        if cancel.is_cancelled() {
            return JobOutcome::Cancelled {
                request_id: None,
                warning: None,
            };
        }

        // Fail fast on escaping targets before any spend.
        let staging_dir = match self.prepare(target) {
            Ok(dir) => dir,
            Err(raw) => return failed(None, raw),
        };

        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupt::Cancelled),
            _ = sleep_until(deadline) => Err(Interrupt::TimedOut),
            result = self.provider.submit(request) => Ok(result),
        };
        let mut handle = match submitted {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return failed(None, RawFailure::provider(Stage::Submit, e)),
            Err(Interrupt::Cancelled) => {
                return JobOutcome::Cancelled {
                    request_id: None,
                    warning: None,
                }
            }
            Err(Interrupt::TimedOut) => {
                return timed_out(None, Stage::Submit, budget);
            }
        };
        let request_id = handle.request_id().to_string();
        self.emit(JobProgress::Submitted {
            request_id: request_id.clone(),
            model_id: handle.model_id().to_string(),
        });

        let mut stage = Stage::Observe;
        let driven = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupt::Cancelled),
            _ = sleep_until(deadline) => Err(Interrupt::TimedOut),
            result = self.produce(&mut handle, &staging_dir, &mut stage) => Ok(result),
        };

        let downloaded = match driven {
            Ok(Ok(downloaded)) => downloaded,
            Ok(Err(raw)) => {
                if !handle.state().is_terminal() {
                    // Stop an abandoned job from accruing spend.
                    self.cancel_remote(&handle).await;
                    handle.advance(JobState::Failed);
                }
                return failed(Some(request_id), raw);
            }
            Err(Interrupt::Cancelled) => {
                let warning = if handle.state().is_terminal() {
                    None
                } else {
                    let warning = self.cancel_remote(&handle).await;
                    handle.advance(JobState::Cancelled);
                    warning
                };
                return JobOutcome::Cancelled {
                    request_id: Some(request_id),
                    warning,
                };
            }
            Err(Interrupt::TimedOut) => {
                if !handle.state().is_terminal() {
                    self.cancel_remote(&handle).await;
                    handle.advance(JobState::TimedOut);
                }
                return timed_out(Some(request_id), stage, budget);
            }
        };

        match self.persist(&handle, target, downloaded).await {
            Ok(artifact) => JobOutcome::Succeeded(artifact),
            Err(raw) => failed(Some(request_id), raw),
        }
    }

    /// Checks containment of every target and returns the staging directory.
    fn prepare(&self, target: &OutputTarget) -> Result<PathBuf, RawFailure> {
        let path_failure = |e| RawFailure::new(Stage::Prepare, FailureCause::Path(e));

        let primary = self.resolver.check(&target.primary).map_err(path_failure)?;
        if let Some(copy_to) = &target.copy_to {
            self.resolver.check(copy_to).map_err(path_failure)?;
        }
        Ok(primary
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.resolver.allowed_root().to_path_buf()))
    }

    /// Observe, fetch and download. `stage` tracks progress for the caller.
    async fn produce(
        &self,
        handle: &mut JobHandle,
        staging_dir: &Path,
        stage: &mut Stage,
    ) -> Result<Downloaded, RawFailure> {
        *stage = Stage::Observe;
        self.observe(handle).await?;

        *stage = Stage::Fetch;
        let result = self
            .provider
            .fetch_result(handle)
            .await
            .map_err(|e| RawFailure::provider(Stage::Fetch, e))?;

        *stage = Stage::Download;
        let artifact = self
            .provider
            .download_artifact(&result.result_url)
            .await
            .map_err(|e| RawFailure::provider(Stage::Download, e))?;
        let (_, extension) =
            detect_type_and_ext(&result.result_url, artifact.content_type.as_deref());

        let mut staged = self
            .placer
            .stage(staging_dir)
            .await
            .map_err(|e| RawFailure::new(Stage::Persist, FailureCause::Placer(e)))?;

        let mut body = artifact.body;
        let mut reported = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| RawFailure::provider(Stage::Download, e))?;
            staged
                .write(&chunk)
                .await
                .map_err(|e| RawFailure::new(Stage::Download, FailureCause::Placer(e)))?;
            if staged.bytes_written() - reported >= PROGRESS_STEP_BYTES {
                reported = staged.bytes_written();
                self.emit(JobProgress::Downloading {
                    request_id: handle.request_id().to_string(),
                    bytes: reported,
                });
            }
        }

        if let Some(expected) = artifact.content_length {
            if staged.bytes_written() != expected {
                return Err(RawFailure::provider(
                    Stage::Download,
                    ProviderError::Transport(format!(
                        "artifact truncated: {} of {} bytes",
                        staged.bytes_written(),
                        expected
                    )),
                ));
            }
        }
        self.emit(JobProgress::Downloading {
            request_id: handle.request_id().to_string(),
            bytes: staged.bytes_written(),
        });

        Ok(Downloaded {
            staged,
            result,
            extension,
        })
    }

    /// Watches status until the provider reports a terminal phase.
    async fn observe(&self, handle: &mut JobHandle) -> Result<(), RawFailure> {
        let mut observer = StatusObserver::new(&self.config, Instant::now());
        handle.advance(JobState::Streaming);

        let open_budget = observer.wait_budget(Instant::now());
        let opened = timeout(open_budget, self.provider.open_status_stream(handle)).await;
        let mut stream = match opened {
            Ok(Ok(stream)) => Some(stream),
            Ok(Err(e)) => {
                self.fall_back(handle, &mut observer, format!("stream unavailable: {}", e));
                None
            }
            Err(_) => {
                self.fall_back(
                    handle,
                    &mut observer,
                    "stream did not open within the silence window".to_string(),
                );
                let verdict = observer.check_deadline(Instant::now());
                if let Verdict::QueueStartTimeout { waited } = verdict {
                    return Err(queue_start_timeout(waited));
                }
                None
            }
        };

        loop {
            let mut lost_stream = None;
            let verdict = match stream.as_mut() {
                Some(events) => {
                    let budget = observer.wait_budget(Instant::now());
                    match timeout(budget, events.next()).await {
                        Ok(Some(Ok(event))) => self.record(handle, &mut observer, event),
                        Ok(Some(Err(e))) => {
                            warn!("Status stream for {} broke: {}", handle.request_id(), e);
                            lost_stream = Some(format!("stream error: {}", e));
                            observer.check_deadline(Instant::now())
                        }
                        Ok(None) => {
                            lost_stream =
                                Some("stream closed before a terminal status".to_string());
                            observer.check_deadline(Instant::now())
                        }
                        Err(_) => {
                            let verdict = observer.check_deadline(Instant::now());
                            if !verdict.is_terminal() {
                                lost_stream =
                                    Some("no status within the silence window".to_string());
                            }
                            verdict
                        }
                    }
                }
                None => match self.provider.poll_status(handle).await {
                    Ok(event) => self.record(handle, &mut observer, event),
                    Err(e) if e.is_retryable() => {
                        warn!("Status poll for {} failed: {}", handle.request_id(), e);
                        observer.check_deadline(Instant::now())
                    }
                    Err(e) => return Err(RawFailure::provider(Stage::Observe, e)),
                },
            };

            match verdict {
                Verdict::Continue => {}
                Verdict::Succeeded => {
                    handle.advance(JobState::Succeeded);
                    return Ok(());
                }
                Verdict::Failed(detail) => {
                    handle.advance(JobState::Failed);
                    return Err(RawFailure::new(Stage::Observe, FailureCause::JobFailed(detail)));
                }
                Verdict::QueueStartTimeout { waited } => return Err(queue_start_timeout(waited)),
            }

            if let Some(reason) = lost_stream {
                stream = None;
                // Poll right away, then at the poll interval.
                self.fall_back(handle, &mut observer, reason);
            } else if stream.is_none() {
                sleep(observer.wait_budget(Instant::now())).await;
            }
        }
    }

    fn record(
        &self,
        handle: &JobHandle,
        observer: &mut StatusObserver,
        event: StatusEvent,
    ) -> Verdict {
        debug!(
            "Job {} status {:?} progress {:?}",
            handle.request_id(),
            event.phase,
            event.progress
        );
        let verdict = observer.observe(&event, Instant::now());
        self.emit(JobProgress::Status {
            request_id: handle.request_id().to_string(),
            mode: observer.mode(),
            event,
        });
        verdict
    }

    fn fall_back(&self, handle: &mut JobHandle, observer: &mut StatusObserver, reason: String) {
        if !observer.fall_back() {
            return;
        }
        metrics::STREAM_FALLBACKS.inc();
        handle.advance(JobState::Polling);
        info!(
            "Job {} falling back to polling ({}), last phase {:?}",
            handle.request_id(),
            reason,
            observer.last_phase()
        );
        self.emit(JobProgress::FellBackToPolling {
            request_id: handle.request_id().to_string(),
            reason,
        });
    }

    /// Commits the staged artifact and makes the optional copy.
    ///
    /// A name taken by a concurrent writer between resolution and rename is
    /// resolved again, up to [`PLACE_ATTEMPTS`] times.
    async fn persist(
        &self,
        handle: &JobHandle,
        target: &OutputTarget,
        downloaded: Downloaded,
    ) -> Result<GeneratedArtifact, RawFailure> {
        let Downloaded {
            mut staged,
            result,
            extension,
        } = downloaded;

        let mut attempt = 0;
        let (placed, suffix) = loop {
            attempt += 1;
            let plan = self.resolve(&target.primary, extension.as_deref(), Stage::Persist)?;
            match self.placer.commit(&mut staged, plan.path()).await {
                Ok(placed) => break (placed, plan.collision_suffix_applied),
                Err(PlacerError::DestinationExists { path }) if attempt < PLACE_ATTEMPTS => {
                    debug!("{} was taken concurrently, resolving again", path.display());
                }
                Err(e) => return Err(RawFailure::new(Stage::Persist, FailureCause::Placer(e))),
            }
        };
        metrics::ARTIFACT_BYTES.inc_by(placed.size_bytes);

        let mut artifact = GeneratedArtifact::new(
            handle.request_id(),
            handle.model_id(),
            placed,
            suffix,
            result,
        );

        if let Some(copy_to) = &target.copy_to {
            let ext = artifact
                .output_path
                .extension()
                .map(|e| e.to_string_lossy().into_owned());

            let mut attempt = 0;
            let copied = loop {
                attempt += 1;
                let plan = self.resolve(copy_to, ext.as_deref(), Stage::Copy)?;
                match self.placer.copy(&artifact.output_path, plan.path()).await {
                    Ok(copied) => break copied,
                    Err(PlacerError::DestinationExists { path }) if attempt < PLACE_ATTEMPTS => {
                        debug!("{} was taken concurrently, resolving again", path.display());
                    }
                    Err(e) => {
                        warn!(
                            "Copy of {} failed, keeping the primary artifact: {}",
                            artifact.output_path.display(),
                            e
                        );
                        return Err(RawFailure::new(Stage::Copy, FailureCause::Placer(e)));
                    }
                }
            };
            artifact.copy_path = Some(copied.path);
        }

        Ok(artifact)
    }

    fn resolve(
        &self,
        spec: &PathSpec,
        extension: Option<&str>,
        stage: Stage,
    ) -> Result<PathPlan, RawFailure> {
        self.resolver
            .resolve_spec(spec, extension)
            .map_err(|e| RawFailure::new(stage, FailureCause::Path(e)))
    }

    /// Best-effort provider cancel. Returns a warning instead of failing.
    async fn cancel_remote(&self, handle: &JobHandle) -> Option<String> {
        match timeout(self.config.cancel_timeout(), self.provider.cancel(handle)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                warn!("Provider cancel for {} failed: {}", handle.request_id(), e);
                Some(format!("Provider cancel failed: {}", e))
            }
            Err(_) => {
                warn!(
                    "Provider cancel for {} did not answer within {:?}",
                    handle.request_id(),
                    self.config.cancel_timeout()
                );
                Some("Provider cancel did not answer in time".to_string())
            }
        }
    }

    fn emit(&self, progress: JobProgress) {
        if let Some(sender) = &self.progress {
            let _ = sender.send(progress);
        }
    }
}

fn failed(request_id: Option<String>, raw: RawFailure) -> JobOutcome {
    JobOutcome::Failed {
        request_id,
        error: ErrorMapper::map(raw),
    }
}

fn timed_out(request_id: Option<String>, stage: Stage, budget: Duration) -> JobOutcome {
    let error = ErrorMapper::map(RawFailure::new(
        stage,
        FailureCause::TimedOut {
            budget_secs: budget.as_secs(),
        },
    ));
    JobOutcome::TimedOut { request_id, error }
}

fn queue_start_timeout(waited: Duration) -> RawFailure {
    RawFailure::new(
        Stage::Observe,
        FailureCause::QueueStartTimeout {
            waited_secs: waited.as_secs(),
        },
    )
}
