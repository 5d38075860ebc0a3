//! Status observation state machine.
//!
//! Observation runs in two modes with a single "last observed phase" carried
//! across the switch: a status stream first, then periodic polling once the
//! stream fails to open, breaks, ends early or stays silent for a whole
//! window. The observer holds no I/O; the runner feeds it events and asks it
//! how long to wait next.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::job::{Phase, StatusEvent};

use super::config::OrchestratorConfig;

/// How status is currently being observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserveMode {
    Streaming,
    Polling,
}

/// What the runner should do after an observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Keep observing.
    Continue,
    Succeeded,
    /// Provider reported failure, with its detail if any.
    Failed(Option<String>),
    /// Still queued after the queue-start bound.
    QueueStartTimeout { waited: Duration },
}

impl Verdict {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Verdict::Continue)
    }
}

#[derive(Debug, Clone)]
pub struct StatusObserver {
    mode: ObserveMode,
    last_phase: Phase,
    submitted_at: Instant,
    /// Cleared once the job has been seen outside the queue.
    queue_deadline: Option<Instant>,
    silence_window: Duration,
    poll_interval: Duration,
}

impl StatusObserver {
    /// Starts in streaming mode with the job assumed queued since `submitted_at`.
    pub fn new(config: &OrchestratorConfig, submitted_at: Instant) -> Self {
        Self {
            mode: ObserveMode::Streaming,
            last_phase: Phase::Queued,
            submitted_at,
            queue_deadline: Some(submitted_at + config.queue_start_timeout()),
            silence_window: config.silence_window(),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn mode(&self) -> ObserveMode {
        self.mode
    }

    pub fn last_phase(&self) -> Phase {
        self.last_phase
    }

    /// Records an event. Only the latest phase is kept.
    pub fn observe(&mut self, event: &StatusEvent, now: Instant) -> Verdict {
        self.last_phase = event.phase;
        match event.phase {
            Phase::Succeeded => Verdict::Succeeded,
            Phase::Failed => Verdict::Failed(event.error_detail.clone()),
            Phase::Running => {
                self.queue_deadline = None;
                Verdict::Continue
            }
            Phase::Queued => self.check_deadline(now),
        }
    }

    /// Queue-start expiry check for when no event arrived.
    pub fn check_deadline(&self, now: Instant) -> Verdict {
        match self.queue_deadline {
            Some(deadline) if now >= deadline => Verdict::QueueStartTimeout {
                waited: now.duration_since(self.submitted_at),
            },
            _ => Verdict::Continue,
        }
    }

    /// Switches to polling. Returns false if already polling.
    pub fn fall_back(&mut self) -> bool {
        if self.mode == ObserveMode::Polling {
            return false;
        }
        self.mode = ObserveMode::Polling;
        true
    }

    /// How long to wait for the next observation: the silence window while
    /// streaming, the poll interval while polling, never past the
    /// queue-start deadline.
    pub fn wait_budget(&self, now: Instant) -> Duration {
        let base = match self.mode {
            ObserveMode::Streaming => self.silence_window,
            ObserveMode::Polling => self.poll_interval,
        };
        match self.queue_deadline {
            Some(deadline) => base.min(deadline.saturating_duration_since(now)),
            None => base,
        }
    }
}
