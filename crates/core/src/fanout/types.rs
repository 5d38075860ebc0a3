//! Types for fanout runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::error::StructuredError;
use crate::job::JobRequest;
use crate::orchestrator::{GeneratedArtifact, OutputTarget};

/// Which fanout operation produced a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutKind {
    /// Same model, `count` variants.
    Batch,
    /// Same prompt across different models.
    Compare,
}

impl FanoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FanoutKind::Batch => "batch",
            FanoutKind::Compare => "compare",
        }
    }
}

/// One pipeline to run as part of a fanout.
#[derive(Debug, Clone)]
pub struct FanoutItem {
    pub request: JobRequest,
    pub target: OutputTarget,
    /// Cancels this item alone. Cancelling the run's token still reaches it.
    pub cancel: Option<CancellationToken>,
}

impl FanoutItem {
    pub fn new(request: JobRequest, target: OutputTarget) -> Self {
        Self {
            request,
            target,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// `count` generations of one request.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub request: JobRequest,
    pub count: usize,
    pub output_dir: PathBuf,
    /// Optional second directory each artifact is copied into.
    pub repo_dir: Option<PathBuf>,
}

/// One prompt across several models.
#[derive(Debug, Clone)]
pub struct CompareRequest {
    pub model_ids: Vec<String>,
    pub prompt: String,
    pub parameters: Map<String, Value>,
    pub output_dir: PathBuf,
    pub repo_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutSuccess {
    /// Position in the original request list.
    pub index: usize,
    pub model_id: String,
    pub output_path: PathBuf,
    pub artifact: GeneratedArtifact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutFailure {
    pub index: usize,
    pub model_id: String,
    pub error: StructuredError,
}

/// Outcome of one fanout item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FanoutItemOutcome {
    Success(FanoutSuccess),
    Failure(FanoutFailure),
}

impl FanoutItemOutcome {
    pub fn index(&self) -> usize {
        match self {
            FanoutItemOutcome::Success(s) => s.index,
            FanoutItemOutcome::Failure(f) => f.index,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FanoutItemOutcome::Success(_))
    }
}

/// Aggregated fanout outcomes, each list in ascending index order.
///
/// Every index of the request appears in exactly one of the two lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FanoutResult {
    pub successes: Vec<FanoutSuccess>,
    pub failures: Vec<FanoutFailure>,
}

impl FanoutResult {
    /// Splits outcomes collected in completion order.
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = FanoutItemOutcome>) -> Self {
        let mut result = Self::default();
        for outcome in outcomes {
            match outcome {
                FanoutItemOutcome::Success(s) => result.successes.push(s),
                FanoutItemOutcome::Failure(f) => result.failures.push(f),
            }
        }
        result.successes.sort_by_key(|s| s.index);
        result.failures.sort_by_key(|f| f.index);
        result
    }

    pub fn len(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    /// All covered indices, ascending.
    pub fn indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .successes
            .iter()
            .map(|s| s.index)
            .chain(self.failures.iter().map(|f| f.index))
            .collect();
        indices.sort_unstable();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, Stage};

    fn failure(index: usize) -> FanoutItemOutcome {
        FanoutItemOutcome::Failure(FanoutFailure {
            index,
            model_id: "a/b".to_string(),
            error: StructuredError::new(ErrorKind::JobFailed, Stage::Observe, "failed"),
        })
    }

    #[test]
    fn test_from_outcomes_sorts_by_index() {
        let result =
            FanoutResult::from_outcomes(vec![failure(3), failure(0), failure(2), failure(1)]);
        let order: Vec<usize> = result.failures.iter().map(|f| f.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(result.indices(), vec![0, 1, 2, 3]);
        assert!(!result.all_succeeded());
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(FanoutKind::Batch.as_str(), "batch");
        assert_eq!(FanoutKind::Compare.as_str(), "compare");
        assert!(FanoutResult::default().is_empty());
    }
}
