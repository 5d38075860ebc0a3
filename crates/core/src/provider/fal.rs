//! HTTP client for a fal-style queue API.
//!
//! Endpoints, relative to the configured queue URL:
//! - `POST /{model}` submit
//! - `GET /{model}/requests/{id}/status` poll
//! - `GET /{model}/requests/{id}/status/stream` SSE status stream
//! - `GET /{model}/requests/{id}` result
//! - `PUT /{model}/requests/{id}/cancel` cancel

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ProviderConfig};
use crate::job::{JobHandle, JobRequest, JobResult, StatusEvent};

use super::payload;
use super::sse::SseDecoder;
use super::types::{Artifact, ByteStream, ProviderClient, ProviderError, StatusStream};

const REQUEST_TIMEOUT_HEADER: &str = "X-Fal-Request-Timeout";
const TIMEOUT_TYPE_HEADER: &str = "X-Fal-Request-Timeout-Type";

/// Backoff before each retry of a failed artifact connection.
const DOWNLOAD_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_secs(1),
    Duration::from_secs(2),
];

/// Queue API client.
pub struct FalClient {
    /// API calls, bounded by the request timeout.
    client: Client,
    /// Status streams; only connecting is bounded.
    stream_client: Client,
    /// Artifact downloads, bounded by the download timeout.
    download_client: Client,
    base_url: String,
    authorization: String,
    queue_start_timeout_secs: u64,
}

impl FalClient {
    /// Create a new client. Fails without a usable credential.
    pub fn new(
        config: &ProviderConfig,
        queue_start_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let authorization = config.authorization()?;
        let request_timeout = Duration::from_secs(config.request_timeout_secs);

        let build = |builder: reqwest::ClientBuilder| {
            builder.build().map_err(|e| {
                ConfigError::ValidationError(format!("Failed to create HTTP client: {}", e))
            })
        };

        Ok(Self {
            client: build(Client::builder().timeout(request_timeout))?,
            stream_client: build(Client::builder().connect_timeout(request_timeout))?,
            download_client: build(
                Client::builder().timeout(Duration::from_secs(config.download_timeout_secs)),
            )?,
            base_url: config.queue_url.trim_end_matches('/').to_string(),
            authorization,
            queue_start_timeout_secs: queue_start_timeout.as_secs(),
        })
    }

    fn submit_url(&self, model_id: &str) -> String {
        format!("{}/{}", self.base_url, model_id)
    }

    fn request_url(&self, handle: &JobHandle, suffix: &str) -> String {
        format!(
            "{}/{}/requests/{}{}",
            self.base_url,
            handle.model_id(),
            urlencoding::encode(handle.request_id()),
            suffix
        )
    }

    /// Sends an authenticated API request and decodes the JSON body.
    ///
    /// An empty body decodes as an empty object.
    async fn send_json(&self, builder: RequestBuilder) -> Result<Value, ProviderError> {
        let response = builder
            .header(AUTHORIZATION, &self.authorization)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;
        let response = error_for_status(response).await?;

        let body = response.bytes().await.map_err(transport_error)?;
        if body.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_slice(&body).map_err(|_| {
            ProviderError::InvalidResponse("Provider returned non-JSON payload".to_string())
        })
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Transport(e.to_string())
    }
}

/// Converts a non-success response into [`ProviderError::Http`].
async fn error_for_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let header = |name| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let retry_after = header(RETRY_AFTER.as_str());
    let timeout_type = header(TIMEOUT_TYPE_HEADER);
    let body = response.text().await.unwrap_or_default();

    Err(ProviderError::Http {
        status: status.as_u16(),
        retry_after,
        timeout_type,
        body,
    })
}

/// Response body as owned chunks.
fn body_stream(response: Response) -> ByteStream {
    response
        .bytes_stream()
        .map(|chunk| chunk.map(|b| b.to_vec()).map_err(transport_error))
        .boxed()
}

/// State threaded through the status stream unfold.
struct StreamState {
    body: ByteStream,
    decoder: SseDecoder,
    ready: VecDeque<Value>,
    done: bool,
}

/// Turns an SSE body into status events, ending after the body does.
fn status_events(body: ByteStream) -> StatusStream {
    let state = StreamState {
        body,
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(value) = state.ready.pop_front() {
                return Some((Ok(payload::status_event(&value)), state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => state.ready.extend(state.decoder.feed(&chunk)),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(ProviderError::StreamUnavailable(e.to_string())), state));
                }
                None => {
                    state.done = true;
                    state.ready.extend(state.decoder.finish());
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl ProviderClient for FalClient {
    fn name(&self) -> &str {
        "fal"
    }

    async fn submit(&self, request: &JobRequest) -> Result<JobHandle, ProviderError> {
        let builder = self
            .client
            .post(self.submit_url(request.model_id()))
            .header(REQUEST_TIMEOUT_HEADER, self.queue_start_timeout_secs.to_string())
            .json(&request.payload());
        let body = self.send_json(builder).await?;

        let request_id = payload::request_id(&body).ok_or_else(|| {
            ProviderError::InvalidResponse("Queue response missing request_id".to_string())
        })?;
        info!("Submitted {} as request {}", request.model_id(), request_id);
        Ok(JobHandle::submitted(request_id, request.model_id()))
    }

    async fn open_status_stream(&self, handle: &JobHandle) -> Result<StatusStream, ProviderError> {
        let response = self
            .stream_client
            .get(self.request_url(handle, "/status/stream"))
            .header(AUTHORIZATION, &self.authorization)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ProviderError::StreamUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::StreamUnavailable(format!(
                "HTTP {} opening status stream for {}",
                status.as_u16(),
                handle.request_id()
            )));
        }

        debug!("Opened status stream for {}", handle.request_id());
        Ok(status_events(body_stream(response)))
    }

    async fn poll_status(&self, handle: &JobHandle) -> Result<StatusEvent, ProviderError> {
        let body = self
            .send_json(self.client.get(self.request_url(handle, "/status")))
            .await?;
        Ok(payload::status_event(&body))
    }

    async fn fetch_result(&self, handle: &JobHandle) -> Result<JobResult, ProviderError> {
        let body = self
            .send_json(self.client.get(self.request_url(handle, "")))
            .await?;
        payload::job_result(&body)
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), ProviderError> {
        self.send_json(self.client.put(self.request_url(handle, "/cancel")))
            .await?;
        info!("Cancel requested for {}", handle.request_id());
        Ok(())
    }

    async fn download_artifact(&self, result_url: &str) -> Result<Artifact, ProviderError> {
        let mut delays = DOWNLOAD_RETRY_DELAYS.iter();
        let response = loop {
            match self.download_client.get(result_url).send().await {
                Ok(response) => break response,
                Err(e) => match delays.next() {
                    Some(delay) => {
                        warn!("Artifact connection failed, retrying in {:?}: {}", delay, e);
                        tokio::time::sleep(*delay).await;
                    }
                    None => return Err(transport_error(e)),
                },
            }
        };
        let response = error_for_status(response).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();

        Ok(Artifact {
            content_type,
            content_length,
            body: body_stream(response),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> FalClient {
        let config = ProviderConfig {
            api_key: "secret".to_string(),
            queue_url: "https://queue.example.com/".to_string(),
            ..ProviderConfig::default()
        };
        FalClient::new(&config, Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn test_urls() {
        let client = client();
        let handle = JobHandle::submitted("req 1", "fal-ai/flux/dev");

        assert_eq!(
            client.submit_url("fal-ai/flux/dev"),
            "https://queue.example.com/fal-ai/flux/dev"
        );
        assert_eq!(
            client.request_url(&handle, "/status"),
            "https://queue.example.com/fal-ai/flux/dev/requests/req%201/status"
        );
        assert_eq!(
            client.request_url(&handle, ""),
            "https://queue.example.com/fal-ai/flux/dev/requests/req%201"
        );
    }

    #[test]
    fn test_authorization_is_normalised() {
        assert_eq!(client().authorization, "Key secret");
    }

    #[tokio::test]
    async fn test_status_events_from_sse_body() {
        let chunks: Vec<Result<Vec<u8>, ProviderError>> = vec![
            Ok(b"data: {\"status\": \"IN_QUEUE\"}\n\n".to_vec()),
            Ok(b"data: {\"status\": \"IN_PROGRESS\", \"progress\": 0.5}\n".to_vec()),
            Ok(b"\ndata: {\"status\": \"COMPLETED\"}\n\n".to_vec()),
        ];
        let events: Vec<_> = status_events(futures::stream::iter(chunks).boxed())
            .collect()
            .await;

        let phases: Vec<_> = events.iter().map(|e| e.as_ref().unwrap().phase).collect();
        assert_eq!(
            phases,
            vec![
                crate::job::Phase::Queued,
                crate::job::Phase::Running,
                crate::job::Phase::Succeeded
            ]
        );
        assert_eq!(events[1].as_ref().unwrap().progress, Some(50.0));
    }

    #[tokio::test]
    async fn test_status_events_surface_body_errors() {
        let chunks: Vec<Result<Vec<u8>, ProviderError>> = vec![
            Ok(b"data: {\"status\": \"IN_QUEUE\"}\n\n".to_vec()),
            Err(ProviderError::Transport("reset".into())),
        ];
        let events: Vec<_> = status_events(futures::stream::iter(chunks).boxed())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(ProviderError::StreamUnavailable(_))));
    }

    #[test]
    fn test_payload_shape() {
        let request = JobRequest::new("a/b", "fox");
        assert_eq!(request.payload(), json!({"prompt": "fox"}));
    }
}
