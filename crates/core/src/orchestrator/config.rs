//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing bounds for one job pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// How long the provider may keep a job in the queued phase (seconds).
    #[serde(default = "default_queue_start_timeout")]
    pub queue_start_timeout_secs: u64,

    /// Wall-clock budget for a single generation, submit through file write (seconds).
    #[serde(default = "default_pipeline_timeout")]
    pub pipeline_timeout_secs: u64,

    /// Wall-clock budget for each batch/compare item (seconds).
    /// Gate waiting counts against this budget.
    #[serde(default = "default_fanout_pipeline_timeout")]
    pub fanout_pipeline_timeout_secs: u64,

    /// Maximum stream silence before falling back to polling (milliseconds).
    #[serde(default = "default_silence_window")]
    pub silence_window_ms: u64,

    /// Delay between status polls once polling (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Upper bound on a best-effort provider cancel call (milliseconds).
    #[serde(default = "default_cancel_timeout")]
    pub cancel_timeout_ms: u64,
}

fn default_queue_start_timeout() -> u64 {
    60
}

fn default_pipeline_timeout() -> u64 {
    360 // 6 minutes
}

fn default_fanout_pipeline_timeout() -> u64 {
    600 // 10 minutes
}

fn default_silence_window() -> u64 {
    15_000
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_cancel_timeout() -> u64 {
    5000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_start_timeout_secs: default_queue_start_timeout(),
            pipeline_timeout_secs: default_pipeline_timeout(),
            fanout_pipeline_timeout_secs: default_fanout_pipeline_timeout(),
            silence_window_ms: default_silence_window(),
            poll_interval_ms: default_poll_interval(),
            cancel_timeout_ms: default_cancel_timeout(),
        }
    }
}

impl OrchestratorConfig {
    pub fn queue_start_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_start_timeout_secs)
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_secs)
    }

    pub fn fanout_pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.fanout_pipeline_timeout_secs)
    }

    pub fn silence_window(&self) -> Duration {
        Duration::from_millis(self.silence_window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }

    /// Sets the silence window.
    pub fn with_silence_window(mut self, window: Duration) -> Self {
        self.silence_window_ms = window.as_millis() as u64;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets the queue-start timeout.
    pub fn with_queue_start_timeout(mut self, timeout: Duration) -> Self {
        self.queue_start_timeout_secs = timeout.as_secs();
        self
    }

    /// Sets both pipeline timeouts.
    pub fn with_pipeline_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline_timeout_secs = timeout.as_secs();
        self.fanout_pipeline_timeout_secs = timeout.as_secs();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.queue_start_timeout_secs, 60);
        assert_eq!(config.pipeline_timeout_secs, 360);
        assert_eq!(config.fanout_pipeline_timeout_secs, 600);
        assert_eq!(config.silence_window(), Duration::from_secs(15));
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.cancel_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            silence_window_ms = 500
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.silence_window_ms, 500);
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(config.pipeline_timeout_secs, 360);
    }

    #[test]
    fn test_builder() {
        let config = OrchestratorConfig::default()
            .with_silence_window(Duration::from_millis(250))
            .with_poll_interval(Duration::from_millis(100))
            .with_queue_start_timeout(Duration::from_secs(5))
            .with_pipeline_timeout(Duration::from_secs(30));

        assert_eq!(config.silence_window_ms, 250);
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.queue_start_timeout_secs, 5);
        assert_eq!(config.pipeline_timeout_secs, 30);
        assert_eq!(config.fanout_pipeline_timeout_secs, 30);
    }
}
