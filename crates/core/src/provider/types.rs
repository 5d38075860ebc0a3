//! Provider client contract.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::job::{JobHandle, JobRequest, JobResult, StatusEvent};

/// Errors surfaced by a provider client.
///
/// Cloneable so scripted test providers can hand out the same failure
/// repeatedly.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Non-success HTTP status from the provider API or artifact host.
    #[error("HTTP {status} from provider: {body}")]
    Http {
        status: u16,
        /// `Retry-After` header, if present.
        retry_after: Option<String>,
        /// Provider request-timeout type header (`user` for queue-start expiry).
        timeout_type: Option<String>,
        body: String,
    },

    #[error("Provider request failed: {0}")]
    Transport(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// The status stream could not be opened or broke mid-way.
    #[error("Status stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("Provider request timed out: {0}")]
    Timeout(String),
}

impl ProviderError {
    /// Plain HTTP status error without headers.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            retry_after: None,
            timeout_type: None,
            body: body.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(_) | Self::Timeout(_) | Self::StreamUnavailable(_) => true,
            Self::InvalidResponse(_) => false,
        }
    }
}

/// Lazily consumed status events; ends at a terminal phase or on closure.
pub type StatusStream = BoxStream<'static, Result<StatusEvent, ProviderError>>;

/// Artifact body chunks.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ProviderError>>;

/// An artifact download in progress.
pub struct Artifact {
    /// `Content-Type` reported by the host, used for extension fallback.
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Queue-based generation provider.
///
/// Wire details stay behind this trait; the orchestrator only relies on the
/// observable contract of each call.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Returns the name of this provider implementation.
    fn name(&self) -> &str;

    /// Submits a job. On success the returned handle carries the request id.
    async fn submit(&self, request: &JobRequest) -> Result<JobHandle, ProviderError>;

    /// Opens a status stream. A stream is not restartable; open a new one.
    async fn open_status_stream(&self, handle: &JobHandle) -> Result<StatusStream, ProviderError>;

    /// Single status snapshot; safe to call repeatedly.
    async fn poll_status(&self, handle: &JobHandle) -> Result<StatusEvent, ProviderError>;

    /// Fetches the result of a succeeded job.
    async fn fetch_result(&self, handle: &JobHandle) -> Result<JobResult, ProviderError>;

    /// Best-effort cancellation.
    async fn cancel(&self, handle: &JobHandle) -> Result<(), ProviderError>;

    /// Starts downloading an artifact.
    async fn download_artifact(&self, result_url: &str) -> Result<Artifact, ProviderError>;
}
