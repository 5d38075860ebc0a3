//! Structured pipeline errors.
//!
//! Every failure that leaves a pipeline is a [`StructuredError`] with a kind
//! from the closed [`ErrorKind`] taxonomy. [`ErrorMapper::map`] is the only
//! place raw provider, path, placer and validation failures are classified.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::ValidationError;
use crate::placer::PlacerError;
use crate::provider::ProviderError;
use crate::resolver::PathError;

/// Closed failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    RateLimited,
    QueueStartTimeout,
    ModelNotFound,
    ProviderRejected,
    JobFailed,
    ProviderUnavailable,
    InvalidResponse,
    ResultExpired,
    DownloadFailed,
    WriteFailed,
    PathEscapeBlocked,
    ScopeMismatch,
    Cancelled,
    TimedOut,
}

impl ErrorKind {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::QueueStartTimeout => "QUEUE_START_TIMEOUT",
            ErrorKind::ModelNotFound => "MODEL_NOT_FOUND",
            ErrorKind::ProviderRejected => "PROVIDER_REJECTED",
            ErrorKind::JobFailed => "JOB_FAILED",
            ErrorKind::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ErrorKind::InvalidResponse => "INVALID_RESPONSE",
            ErrorKind::ResultExpired => "CDN_EXPIRED",
            ErrorKind::DownloadFailed => "DOWNLOAD_FAILED",
            ErrorKind::WriteFailed => "WRITE_FAILED",
            ErrorKind::PathEscapeBlocked => "PATH_TRAVERSAL_BLOCKED",
            ErrorKind::ScopeMismatch => "SCOPE_MISMATCH",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::TimedOut => "TIMED_OUT",
        }
    }

    /// Kebab-case name used in outcome tags.
    pub fn slug(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::QueueStartTimeout => "queue-start-timeout",
            ErrorKind::ModelNotFound => "model-not-found",
            ErrorKind::ProviderRejected => "provider-rejected",
            ErrorKind::JobFailed => "job-failed",
            ErrorKind::ProviderUnavailable => "provider-unavailable",
            ErrorKind::InvalidResponse => "invalid-response",
            ErrorKind::ResultExpired => "result-expired",
            ErrorKind::DownloadFailed => "download-failed",
            ErrorKind::WriteFailed => "write-failed",
            ErrorKind::PathEscapeBlocked => "path-escape-blocked",
            ErrorKind::ScopeMismatch => "scope-mismatch",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::TimedOut => "timed-out",
        }
    }

    /// Whether a caller may retry. The core itself never retries.
    pub fn retryable(&self) -> bool {
        match self {
            ErrorKind::RateLimited
            | ErrorKind::QueueStartTimeout
            | ErrorKind::ProviderUnavailable
            | ErrorKind::ResultExpired
            | ErrorKind::DownloadFailed
            | ErrorKind::WriteFailed => true,
            ErrorKind::Validation
            | ErrorKind::ModelNotFound
            | ErrorKind::ProviderRejected
            | ErrorKind::JobFailed
            | ErrorKind::InvalidResponse
            | ErrorKind::PathEscapeBlocked
            | ErrorKind::ScopeMismatch
            | ErrorKind::Cancelled
            | ErrorKind::TimedOut => false,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Pipeline step a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Input validation and path containment, before submission.
    Prepare,
    Submit,
    Observe,
    Fetch,
    Download,
    Persist,
    Copy,
}

impl Stage {
    /// True once the provider-side job has succeeded and spend occurred.
    pub fn is_post_spend(&self) -> bool {
        matches!(
            self,
            Stage::Fetch | Stage::Download | Stage::Persist | Stage::Copy
        )
    }
}

/// The only error type that crosses the pipeline boundary.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StructuredError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub stage: Stage,
    /// The provider finished the job (spend occurred) but the pipeline failed.
    pub provider_succeeded: bool,
}

impl StructuredError {
    pub fn new(kind: ErrorKind, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.retryable(),
            stage,
            provider_succeeded: stage.is_post_spend(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Outcome tag, e.g. `download-failed-after-spend`.
    pub fn tag(&self) -> String {
        if self.provider_succeeded {
            format!("{}-after-spend", self.kind.slug())
        } else {
            self.kind.slug().to_string()
        }
    }
}

/// What went wrong, before classification.
#[derive(Debug)]
pub enum FailureCause {
    Provider(ProviderError),
    Path(PathError),
    Placer(PlacerError),
    Validation(ValidationError),
    /// Provider reported the job as failed.
    JobFailed(Option<String>),
    /// Job never left the queue within the queue-start bound.
    QueueStartTimeout { waited_secs: u64 },
    /// Overall pipeline budget expired.
    TimedOut { budget_secs: u64 },
    Cancelled,
}

/// A failure plus the stage it happened in.
#[derive(Debug)]
pub struct RawFailure {
    pub stage: Stage,
    pub cause: FailureCause,
}

impl RawFailure {
    pub fn new(stage: Stage, cause: FailureCause) -> Self {
        Self { stage, cause }
    }

    pub fn provider(stage: Stage, error: ProviderError) -> Self {
        Self::new(stage, FailureCause::Provider(error))
    }
}

const MAX_BODY_CHARS: usize = 500;

/// Maps raw failures onto the closed taxonomy. Stateless.
pub struct ErrorMapper;

impl ErrorMapper {
    pub fn map(raw: RawFailure) -> StructuredError {
        let stage = raw.stage;
        let (kind, message) = match raw.cause {
            FailureCause::Provider(error) if stage == Stage::Download => map_download(error),
            FailureCause::Provider(error) => map_provider(error),
            FailureCause::Path(error) => map_path(error),
            FailureCause::Placer(error) => (ErrorKind::WriteFailed, error.to_string()),
            FailureCause::Validation(error) => (ErrorKind::Validation, error.to_string()),
            FailureCause::JobFailed(detail) => (
                ErrorKind::JobFailed,
                match detail {
                    Some(detail) => format!("Provider job failed: {}", detail),
                    None => "Provider job failed".to_string(),
                },
            ),
            FailureCause::QueueStartTimeout { waited_secs } => (
                ErrorKind::QueueStartTimeout,
                format!("Job did not leave the queue within {}s", waited_secs),
            ),
            FailureCause::TimedOut { budget_secs } => (
                ErrorKind::TimedOut,
                format!("Pipeline exceeded its {}s budget", budget_secs),
            ),
            FailureCause::Cancelled => (ErrorKind::Cancelled, "Job was cancelled".to_string()),
        };
        StructuredError::new(kind, stage, message)
    }
}

fn map_provider(error: ProviderError) -> (ErrorKind, String) {
    match error {
        ProviderError::Http {
            status: 429,
            retry_after,
            ..
        } => (
            ErrorKind::RateLimited,
            format!(
                "Rate limited by provider. Retry-After={}",
                retry_after.as_deref().unwrap_or("unknown")
            ),
        ),
        ProviderError::Http { status: 404, .. } => (
            ErrorKind::ModelNotFound,
            "Model or request ID not found".to_string(),
        ),
        ProviderError::Http {
            status: 401 | 403,
            body,
            ..
        } => (
            ErrorKind::ScopeMismatch,
            format!("Credential rejected: {}", truncate(&body)),
        ),
        ProviderError::Http {
            status: 504,
            timeout_type: Some(ref kind),
            ..
        } if kind == "user" => (
            ErrorKind::QueueStartTimeout,
            "Queue job did not start within the requested timeout window".to_string(),
        ),
        ProviderError::Http {
            status: 400 | 422,
            body,
            ..
        } => (
            ErrorKind::Validation,
            format!("Provider rejected the input: {}", truncate(&body)),
        ),
        ProviderError::Http { status, body, .. } => (
            ErrorKind::ProviderRejected,
            format!("{} response from provider: {}", status, truncate(&body)),
        ),
        ProviderError::InvalidResponse(msg) => (ErrorKind::InvalidResponse, msg),
        error @ (ProviderError::Transport(_)
        | ProviderError::Timeout(_)
        | ProviderError::StreamUnavailable(_)) => {
            (ErrorKind::ProviderUnavailable, error.to_string())
        }
    }
}

fn map_download(error: ProviderError) -> (ErrorKind, String) {
    match error {
        ProviderError::Http {
            status: 403 | 404, ..
        } => (
            ErrorKind::ResultExpired,
            "Artifact URL expired or inaccessible".to_string(),
        ),
        error => (
            ErrorKind::DownloadFailed,
            format!("Artifact download failed: {}", error),
        ),
    }
}

fn map_path(error: PathError) -> (ErrorKind, String) {
    let kind = match &error {
        PathError::Escape { .. } => ErrorKind::PathEscapeBlocked,
        PathError::InvalidFileName(_) | PathError::IsDirectory(_) => ErrorKind::Validation,
        PathError::InvalidRoot { .. } | PathError::Io(_) => ErrorKind::WriteFailed,
    };
    (kind, error.to_string())
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn provider(stage: Stage, error: ProviderError) -> StructuredError {
        ErrorMapper::map(RawFailure::provider(stage, error))
    }

    #[test]
    fn test_http_classification() {
        let rate = provider(
            Stage::Submit,
            ProviderError::Http {
                status: 429,
                retry_after: Some("30".to_string()),
                timeout_type: None,
                body: String::new(),
            },
        );
        assert_eq!(rate.kind, ErrorKind::RateLimited);
        assert!(rate.retryable);
        assert!(rate.message.contains("Retry-After=30"));

        assert_eq!(
            provider(Stage::Submit, ProviderError::http(404, "")).kind,
            ErrorKind::ModelNotFound
        );
        assert_eq!(
            provider(Stage::Submit, ProviderError::http(403, "")).kind,
            ErrorKind::ScopeMismatch
        );
        assert_eq!(
            provider(Stage::Submit, ProviderError::http(422, "bad")).kind,
            ErrorKind::Validation
        );
        assert_eq!(
            provider(Stage::Submit, ProviderError::http(500, "boom")).kind,
            ErrorKind::ProviderRejected
        );
        assert_eq!(
            provider(Stage::Observe, ProviderError::Transport("reset".into())).kind,
            ErrorKind::ProviderUnavailable
        );
    }

    #[test]
    fn test_queue_start_timeout_header() {
        let err = provider(
            Stage::Submit,
            ProviderError::Http {
                status: 504,
                retry_after: None,
                timeout_type: Some("user".to_string()),
                body: String::new(),
            },
        );
        assert_eq!(err.kind, ErrorKind::QueueStartTimeout);
        assert!(err.retryable);

        // Other gateway timeouts are plain rejections.
        assert_eq!(
            provider(Stage::Submit, ProviderError::http(504, "")).kind,
            ErrorKind::ProviderRejected
        );
    }

    #[test]
    fn test_download_stage_classification() {
        let expired = provider(Stage::Download, ProviderError::http(404, ""));
        assert_eq!(expired.kind, ErrorKind::ResultExpired);
        assert_eq!(expired.code(), "CDN_EXPIRED");
        assert!(expired.retryable);

        let failed = provider(Stage::Download, ProviderError::Transport("eof".into()));
        assert_eq!(failed.kind, ErrorKind::DownloadFailed);
        assert!(failed.provider_succeeded);
        assert_eq!(failed.tag(), "download-failed-after-spend");
    }

    #[test]
    fn test_pre_spend_tags() {
        let err = provider(Stage::Submit, ProviderError::http(500, ""));
        assert!(!err.provider_succeeded);
        assert_eq!(err.tag(), "provider-rejected");

        let failed = ErrorMapper::map(RawFailure::new(
            Stage::Observe,
            FailureCause::JobFailed(Some("nsfw".into())),
        ));
        assert_eq!(failed.kind, ErrorKind::JobFailed);
        assert!(!failed.retryable);
        assert_eq!(failed.tag(), "job-failed");
    }

    #[test]
    fn test_path_and_placer_classification() {
        let escape = ErrorMapper::map(RawFailure::new(
            Stage::Prepare,
            FailureCause::Path(PathError::Escape {
                resolved: PathBuf::from("/etc/passwd"),
                root: PathBuf::from("/work"),
            }),
        ));
        assert_eq!(escape.kind, ErrorKind::PathEscapeBlocked);
        assert_eq!(escape.code(), "PATH_TRAVERSAL_BLOCKED");
        assert!(!escape.retryable);

        let write = ErrorMapper::map(RawFailure::new(
            Stage::Persist,
            FailureCause::Placer(PlacerError::DestinationExists {
                path: PathBuf::from("/work/a.png"),
            }),
        ));
        assert_eq!(write.kind, ErrorKind::WriteFailed);
        assert_eq!(write.tag(), "write-failed-after-spend");
    }

    #[test]
    fn test_timeouts_and_cancel() {
        let timed_out = ErrorMapper::map(RawFailure::new(
            Stage::Observe,
            FailureCause::TimedOut { budget_secs: 360 },
        ));
        assert_eq!(timed_out.kind, ErrorKind::TimedOut);
        assert!(!timed_out.retryable);
        assert!(timed_out.message.contains("360s"));

        let cancelled = ErrorMapper::map(RawFailure::new(Stage::Submit, FailureCause::Cancelled));
        assert_eq!(cancelled.code(), "CANCELLED");
    }

    #[test]
    fn test_long_bodies_truncated() {
        let body = "x".repeat(2000);
        let err = provider(Stage::Submit, ProviderError::http(500, body));
        assert!(err.message.len() < 600);
        assert!(err.message.ends_with("..."));
    }

    #[test]
    fn test_display_uses_code() {
        let err = StructuredError::new(ErrorKind::RateLimited, Stage::Submit, "slow down");
        assert_eq!(err.to_string(), "RATE_LIMITED: slow down");
    }
}
