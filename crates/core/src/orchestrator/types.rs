//! Types for the job orchestrator.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, StructuredError};
use crate::job::{JobResult, StatusEvent};
use crate::placer::PlacedFile;
use crate::resolver::PathSpec;

use super::observer::ObserveMode;

/// Where a pipeline writes its artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTarget {
    pub primary: PathSpec,
    /// Optional secondary copy, e.g. into a repository directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_to: Option<PathSpec>,
}

impl OutputTarget {
    pub fn new(primary: PathSpec) -> Self {
        Self {
            primary,
            copy_to: None,
        }
    }

    pub fn with_copy(mut self, copy_to: PathSpec) -> Self {
        self.copy_to = Some(copy_to);
        self
    }
}

/// A persisted artifact from a succeeded pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub request_id: String,
    pub model_id: String,
    pub output_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_path: Option<PathBuf>,
    /// Numeric suffix added to avoid an existing file (0 if none).
    pub collision_suffix: u32,
    pub size_bytes: u64,
    pub sha256: String,
    pub result: JobResult,
}

impl GeneratedArtifact {
    pub(crate) fn new(
        request_id: &str,
        model_id: &str,
        placed: PlacedFile,
        collision_suffix: u32,
        result: JobResult,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            model_id: model_id.to_string(),
            output_path: placed.path,
            copy_path: None,
            collision_suffix,
            size_bytes: placed.size_bytes,
            sha256: placed.sha256,
            result,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

/// Terminal outcome of one pipeline. Never an `Err`: every failure is
/// carried as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded(GeneratedArtifact),
    Failed {
        /// `None` when submission never succeeded.
        request_id: Option<String>,
        error: StructuredError,
    },
    Cancelled {
        request_id: Option<String>,
        /// Set when the best-effort provider cancel did not go through.
        warning: Option<String>,
    },
    TimedOut {
        request_id: Option<String>,
        error: StructuredError,
    },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded(_))
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            JobOutcome::Succeeded(artifact) => Some(&artifact.request_id),
            JobOutcome::Failed { request_id, .. }
            | JobOutcome::Cancelled { request_id, .. }
            | JobOutcome::TimedOut { request_id, .. } => request_id.as_deref(),
        }
    }

    pub fn error(&self) -> Option<&StructuredError> {
        match self {
            JobOutcome::Failed { error, .. } | JobOutcome::TimedOut { error, .. } => Some(error),
            JobOutcome::Succeeded(_) | JobOutcome::Cancelled { .. } => None,
        }
    }

    /// Label used for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded(_) => "succeeded",
            JobOutcome::Failed { .. } => "failed",
            JobOutcome::Cancelled { .. } => "cancelled",
            JobOutcome::TimedOut { .. } => "timed_out",
        }
    }

    /// Collapses the outcome for aggregation. Cancellation becomes a
    /// [`ErrorKind::Cancelled`] error.
    pub fn into_result(self) -> Result<GeneratedArtifact, StructuredError> {
        match self {
            JobOutcome::Succeeded(artifact) => Ok(artifact),
            JobOutcome::Failed { error, .. } | JobOutcome::TimedOut { error, .. } => Err(error),
            JobOutcome::Cancelled { warning, .. } => {
                let message = match warning {
                    Some(warning) => format!("Job was cancelled ({})", warning),
                    None => "Job was cancelled".to_string(),
                };
                Err(StructuredError::new(
                    ErrorKind::Cancelled,
                    crate::error::Stage::Observe,
                    message,
                ))
            }
        }
    }
}

/// Progress notifications sent while a pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobProgress {
    Submitted {
        request_id: String,
        model_id: String,
    },
    Status {
        request_id: String,
        mode: ObserveMode,
        event: StatusEvent,
    },
    FellBackToPolling {
        request_id: String,
        reason: String,
    },
    Downloading {
        request_id: String,
        bytes: u64,
    },
    Completed {
        request_id: String,
        output_path: PathBuf,
    },
    Failed {
        request_id: Option<String>,
        code: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::media::MediaType;

    fn artifact() -> GeneratedArtifact {
        GeneratedArtifact::new(
            "req-1",
            "fal-ai/flux/dev",
            PlacedFile {
                path: PathBuf::from("/work/out.png"),
                size_bytes: 3,
                sha256: "abc".to_string(),
            },
            1,
            JobResult {
                result_url: "https://cdn.example.com/out.png".to_string(),
                media_type: MediaType::Image,
                cost_usd: Some(0.01),
                duration_ms: None,
            },
        )
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = JobOutcome::Succeeded(artifact());
        assert!(ok.is_success());
        assert_eq!(ok.request_id(), Some("req-1"));
        assert_eq!(ok.as_str(), "succeeded");
        assert!(ok.error().is_none());

        let failed = JobOutcome::Failed {
            request_id: None,
            error: StructuredError::new(ErrorKind::RateLimited, Stage::Submit, "slow down"),
        };
        assert_eq!(failed.request_id(), None);
        assert_eq!(failed.error().map(|e| e.kind), Some(ErrorKind::RateLimited));
    }

    #[test]
    fn test_cancelled_into_result() {
        let cancelled = JobOutcome::Cancelled {
            request_id: Some("req-2".to_string()),
            warning: Some("cancel call failed".to_string()),
        };
        let err = cancelled.into_result().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(err.message.contains("cancel call failed"));
        assert!(!err.provider_succeeded);
    }

    #[test]
    fn test_progress_serialization() {
        let progress = JobProgress::Downloading {
            request_id: "req-1".to_string(),
            bytes: 42,
        };
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["status"], "downloading");
        assert_eq!(json["bytes"], 42);
    }

    #[test]
    fn test_target_builder() {
        let target = OutputTarget::new(PathSpec::file("out/a.png"))
            .with_copy(PathSpec::in_dir("repo", "a"));
        assert_eq!(target.copy_to, Some(PathSpec::in_dir("repo", "a")));
    }
}
