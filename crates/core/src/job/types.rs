//! Core job data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::media::MediaType;

// ============================================================================
// Request
// ============================================================================

/// A single generation request.
///
/// Built once per pipeline invocation and never mutated afterwards; fields
/// are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    model_id: String,
    prompt: String,
    #[serde(default)]
    parameters: Map<String, Value>,
    created_at: DateTime<Utc>,
}

impl JobRequest {
    /// Creates a request with no extra parameters.
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            parameters: Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Attaches opaque model parameters.
    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Same request retargeted at another model (used by compare fanout).
    pub fn for_model(&self, model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: self.prompt.clone(),
            parameters: self.parameters.clone(),
            created_at: Utc::now(),
        }
    }

    /// JSON body sent on submission: `{"prompt": ..., ...parameters}`.
    ///
    /// Parameters win over the prompt key if both are present.
    pub fn payload(&self) -> Value {
        let mut body = Map::new();
        body.insert("prompt".to_string(), Value::String(self.prompt.clone()));
        for (key, value) in &self.parameters {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Submitted,
    Streaming,
    Polling,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl JobState {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled | JobState::TimedOut
        )
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            // Submission failure goes straight to Failed.
            (Pending, Submitted | Failed | Cancelled | TimedOut) => true,
            (Submitted, Streaming | Polling) => true,
            (Streaming, Polling) => true,
            (Submitted | Streaming | Polling, Succeeded | Failed | Cancelled | TimedOut) => true,
            _ => false,
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Submitted => "submitted",
            JobState::Streaming => "streaming",
            JobState::Polling => "polling",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            JobState::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One in-flight or completed unit of provider work.
///
/// Created by the provider on successful submission and owned by exactly one
/// orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    request_id: String,
    model_id: String,
    state: JobState,
    started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    terminal_at: Option<DateTime<Utc>>,
}

impl JobHandle {
    /// A freshly submitted job.
    pub fn submitted(request_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            model_id: model_id.into(),
            state: JobState::Submitted,
            started_at: Utc::now(),
            terminal_at: None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn terminal_at(&self) -> Option<DateTime<Utc>> {
        self.terminal_at
    }

    /// Moves the handle to `next`, stamping `terminal_at` on terminal states.
    ///
    /// Illegal transitions are ignored and reported as `false`.
    pub(crate) fn advance(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::debug!(
                "Ignoring job {} transition {} -> {}",
                self.request_id,
                self.state,
                next
            );
            return false;
        }
        self.state = next;
        if next.is_terminal() {
            self.terminal_at = Some(Utc::now());
        }
        true
    }
}

// ============================================================================
// Status
// ============================================================================

/// Provider-side phase reported in a status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }
}

/// Point-in-time status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub phase: Phase,
    /// Percent complete in `[0, 100]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl StatusEvent {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            progress: None,
            error_detail: None,
        }
    }

    pub fn queued() -> Self {
        Self::new(Phase::Queued)
    }

    pub fn running(progress: Option<f32>) -> Self {
        Self {
            progress,
            ..Self::new(Phase::Running)
        }
    }

    pub fn succeeded() -> Self {
        Self {
            progress: Some(100.0),
            ..Self::new(Phase::Succeeded)
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            error_detail: Some(detail.into()),
            ..Self::new(Phase::Failed)
        }
    }
}

// ============================================================================
// Result
// ============================================================================

/// Terminal success payload fetched from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub result_url: String,
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}
