//! Mock provider client for testing.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::job::{JobHandle, JobRequest, JobResult, StatusEvent};
use crate::media::MediaType;
use crate::provider::{Artifact, ProviderClient, ProviderError, StatusStream};

/// How the status stream of a scripted job behaves.
#[derive(Debug, Clone)]
pub enum StreamBehavior {
    /// Emits the events, then closes.
    Events(Vec<StatusEvent>),
    /// Emits the events, then stays open without sending anything.
    Stall(Vec<StatusEvent>),
    /// Emits the events, then fails.
    Break(Vec<StatusEvent>),
    /// Opening the stream fails.
    Unavailable,
    /// Opening the stream never completes.
    HangOnOpen,
}

/// Scripted behaviour for every job of one model.
#[derive(Debug, Clone)]
pub struct MockJobScript {
    pub submit_error: Option<ProviderError>,
    pub stream: StreamBehavior,
    /// Delay before each stream event.
    pub event_delay: Duration,
    /// Poll responses in order; the last one repeats.
    pub poll_events: Vec<StatusEvent>,
    pub fetch_error: Option<ProviderError>,
    pub download_error: Option<ProviderError>,
    /// Fails the artifact body after its first chunk.
    pub body_error: Option<ProviderError>,
    pub cancel_error: Option<ProviderError>,
    pub artifact: Vec<u8>,
    /// Chunks the artifact body is split into.
    pub artifact_chunks: usize,
    /// Delay before each artifact chunk.
    pub chunk_delay: Duration,
    /// Extension in the result URL, if any.
    pub url_extension: Option<String>,
    pub content_type: Option<String>,
    pub cost_usd: Option<f64>,
}

impl Default for MockJobScript {
    fn default() -> Self {
        Self::succeeding()
    }
}

impl MockJobScript {
    /// Queued, running, succeeded over the stream; a small PNG artifact.
    pub fn succeeding() -> Self {
        Self {
            submit_error: None,
            stream: StreamBehavior::Events(vec![
                StatusEvent::queued(),
                StatusEvent::running(Some(50.0)),
                StatusEvent::succeeded(),
            ]),
            event_delay: Duration::from_millis(10),
            poll_events: vec![StatusEvent::succeeded()],
            fetch_error: None,
            download_error: None,
            body_error: None,
            cancel_error: None,
            artifact: b"mock-artifact-bytes".to_vec(),
            artifact_chunks: 1,
            chunk_delay: Duration::ZERO,
            url_extension: Some("png".to_string()),
            content_type: Some("image/png".to_string()),
            cost_usd: Some(0.01),
        }
    }

    /// Provider reports the job as failed.
    pub fn failing(detail: &str) -> Self {
        Self {
            stream: StreamBehavior::Events(vec![
                StatusEvent::queued(),
                StatusEvent::failed(detail),
            ]),
            poll_events: vec![StatusEvent::failed(detail)],
            ..Self::succeeding()
        }
    }

    /// Job that never finishes, neither over the stream nor by polling.
    pub fn never_finishing(phase_event: StatusEvent) -> Self {
        Self {
            stream: StreamBehavior::Stall(vec![phase_event.clone()]),
            poll_events: vec![phase_event],
            ..Self::succeeding()
        }
    }

    pub fn with_stream(mut self, stream: StreamBehavior) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = delay;
        self
    }

    pub fn with_poll_events(mut self, events: Vec<StatusEvent>) -> Self {
        self.poll_events = events;
        self
    }

    pub fn with_submit_error(mut self, error: ProviderError) -> Self {
        self.submit_error = Some(error);
        self
    }

    pub fn with_fetch_error(mut self, error: ProviderError) -> Self {
        self.fetch_error = Some(error);
        self
    }

    pub fn with_download_error(mut self, error: ProviderError) -> Self {
        self.download_error = Some(error);
        self
    }

    pub fn with_body_error(mut self, error: ProviderError) -> Self {
        self.body_error = Some(error);
        self
    }

    pub fn with_cancel_error(mut self, error: ProviderError) -> Self {
        self.cancel_error = Some(error);
        self
    }

    /// Sets the artifact bytes and the extension of the result URL.
    pub fn with_artifact(
        mut self,
        bytes: &[u8],
        url_extension: Option<&str>,
        content_type: Option<&str>,
    ) -> Self {
        self.artifact = bytes.to_vec();
        self.url_extension = url_extension.map(str::to_string);
        self.content_type = content_type.map(str::to_string);
        self
    }

    pub fn with_chunks(mut self, chunks: usize, delay: Duration) -> Self {
        self.artifact_chunks = chunks.max(1);
        self.chunk_delay = delay;
        self
    }
}

/// A recorded submission.
#[derive(Debug, Clone)]
pub struct RecordedSubmit {
    pub request_id: String,
    pub model_id: String,
    pub prompt: String,
    pub at: Instant,
}

/// A recorded call naming a request.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request_id: String,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<String, MockJobScript>,
    /// request id -> model id
    jobs: HashMap<String, String>,
    /// result URL -> (request id, model id)
    results: HashMap<String, (String, String)>,
    poll_cursor: HashMap<String, usize>,
    submits: Vec<RecordedSubmit>,
    polls: Vec<RecordedCall>,
    cancels: Vec<RecordedCall>,
    streams_opened: Vec<RecordedCall>,
    downloads: Vec<RecordedCall>,
    next_id: u32,
}

/// Mock implementation of the ProviderClient trait.
///
/// Provides controllable behavior for testing:
/// - Script each model's status stream, polls, result and artifact
/// - Simulate failures at any call
/// - Record calls with their (tokio) time for assertions
///
/// # Example
///
/// ```rust,ignore
/// let provider = MockProvider::new();
/// provider
///     .set_script("fal-ai/b", MockJobScript::failing("nsfw"))
///     .await;
///
/// // Run pipelines...
///
/// let submits = provider.submits().await;
/// assert_eq!(submits.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    state: Arc<RwLock<MockState>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts every job of `model_id`. Unscripted models succeed.
    pub async fn set_script(&self, model_id: &str, script: MockJobScript) {
        self.state
            .write()
            .await
            .scripts
            .insert(model_id.to_string(), script);
    }

    pub async fn submits(&self) -> Vec<RecordedSubmit> {
        self.state.read().await.submits.clone()
    }

    pub async fn polls(&self) -> Vec<RecordedCall> {
        self.state.read().await.polls.clone()
    }

    pub async fn cancels(&self) -> Vec<RecordedCall> {
        self.state.read().await.cancels.clone()
    }

    pub async fn streams_opened(&self) -> Vec<RecordedCall> {
        self.state.read().await.streams_opened.clone()
    }

    pub async fn downloads(&self) -> Vec<RecordedCall> {
        self.state.read().await.downloads.clone()
    }

    async fn script_for_job(&self, request_id: &str) -> Result<MockJobScript, ProviderError> {
        let state = self.state.read().await;
        let model_id = state
            .jobs
            .get(request_id)
            .ok_or_else(|| ProviderError::http(404, format!("unknown request {}", request_id)))?;
        Ok(state.scripts.get(model_id).cloned().unwrap_or_default())
    }

    fn result_url(request_id: &str, script: &MockJobScript) -> String {
        match &script.url_extension {
            Some(ext) => format!("https://cdn.example.com/{}/output.{}", request_id, ext),
            None => format!("https://cdn.example.com/{}/output", request_id),
        }
    }
}

fn record(calls: &mut Vec<RecordedCall>, request_id: &str) {
    calls.push(RecordedCall {
        request_id: request_id.to_string(),
        at: Instant::now(),
    });
}

#[async_trait]
impl ProviderClient for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, request: &JobRequest) -> Result<JobHandle, ProviderError> {
        let mut state = self.state.write().await;
        let script = state
            .scripts
            .get(request.model_id())
            .cloned()
            .unwrap_or_default();
        if let Some(error) = script.submit_error {
            return Err(error);
        }

        state.next_id += 1;
        let request_id = format!("req-{}", state.next_id);
        state
            .jobs
            .insert(request_id.clone(), request.model_id().to_string());
        state.submits.push(RecordedSubmit {
            request_id: request_id.clone(),
            model_id: request.model_id().to_string(),
            prompt: request.prompt().to_string(),
            at: Instant::now(),
        });

        Ok(JobHandle::submitted(request_id, request.model_id()))
    }

    async fn open_status_stream(&self, handle: &JobHandle) -> Result<StatusStream, ProviderError> {
        let script = self.script_for_job(handle.request_id()).await?;
        record(&mut self.state.write().await.streams_opened, handle.request_id());

        let delay = script.event_delay;
        let emit = |events: Vec<StatusEvent>| {
            futures::stream::iter(events).then(move |event| async move {
                tokio::time::sleep(delay).await;
                Ok::<_, ProviderError>(event)
            })
        };

        let stream = match script.stream {
            StreamBehavior::Events(events) => emit(events).boxed(),
            StreamBehavior::Stall(events) => emit(events).chain(futures::stream::pending()).boxed(),
            StreamBehavior::Break(events) => emit(events)
                .chain(futures::stream::once(async {
                    Err(ProviderError::StreamUnavailable("connection reset".to_string()))
                }))
                .boxed(),
            StreamBehavior::Unavailable => {
                return Err(ProviderError::StreamUnavailable("HTTP 405".to_string()))
            }
            StreamBehavior::HangOnOpen => futures::future::pending().await,
        };
        Ok(stream)
    }

    async fn poll_status(&self, handle: &JobHandle) -> Result<StatusEvent, ProviderError> {
        let script = self.script_for_job(handle.request_id()).await?;
        let mut state = self.state.write().await;
        record(&mut state.polls, handle.request_id());

        let cursor = state
            .poll_cursor
            .entry(handle.request_id().to_string())
            .or_insert(0);
        let index = (*cursor).min(script.poll_events.len().saturating_sub(1));
        *cursor += 1;
        script
            .poll_events
            .get(index)
            .cloned()
            .ok_or_else(|| ProviderError::InvalidResponse("no scripted poll response".to_string()))
    }

    async fn fetch_result(&self, handle: &JobHandle) -> Result<JobResult, ProviderError> {
        let script = self.script_for_job(handle.request_id()).await?;
        if let Some(error) = script.fetch_error.clone() {
            return Err(error);
        }

        let result_url = Self::result_url(handle.request_id(), &script);
        self.state
            .write()
            .await
            .results
            .insert(
                result_url.clone(),
                (handle.request_id().to_string(), handle.model_id().to_string()),
            );

        let media_type = match script.url_extension.as_deref() {
            Some(ext) => crate::media::media_type_for_extension(ext),
            None => MediaType::Unknown,
        };
        Ok(JobResult {
            result_url,
            media_type,
            cost_usd: script.cost_usd,
            duration_ms: Some(1000),
        })
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), ProviderError> {
        let script = self.script_for_job(handle.request_id()).await?;
        record(&mut self.state.write().await.cancels, handle.request_id());
        match script.cancel_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn download_artifact(&self, result_url: &str) -> Result<Artifact, ProviderError> {
        let script = {
            let mut state = self.state.write().await;
            let (request_id, model_id) = state
                .results
                .get(result_url)
                .cloned()
                .ok_or_else(|| ProviderError::http(404, "unknown artifact"))?;
            record(&mut state.downloads, &request_id);
            state.scripts.get(&model_id).cloned().unwrap_or_default()
        };
        if let Some(error) = script.download_error {
            return Err(error);
        }

        let chunk_size = script.artifact.len().div_ceil(script.artifact_chunks).max(1);
        let chunks: Vec<Vec<u8>> = script.artifact.chunks(chunk_size).map(<[u8]>::to_vec).collect();
        let delay = script.chunk_delay;
        let mut items: Vec<Result<Vec<u8>, ProviderError>> = Vec::new();
        for (index, chunk) in chunks.into_iter().enumerate() {
            items.push(Ok(chunk));
            if index == 0 {
                if let Some(error) = script.body_error.clone() {
                    items.push(Err(error));
                    break;
                }
            }
        }

        let body = futures::stream::iter(items)
            .then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            })
            .boxed();

        Ok(Artifact {
            content_type: script.content_type,
            content_length: Some(script.artifact.len() as u64),
            body,
        })
    }
}
