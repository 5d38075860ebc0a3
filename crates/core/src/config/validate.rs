use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - All limits are non-zero
/// - Silence window and poll interval are non-zero
/// - Queue-start timeout fits inside both pipeline timeouts
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let limits = &config.limits;
    for (name, value) in [
        ("limits.max_prompt_length", limits.max_prompt_length),
        ("limits.max_batch_count", limits.max_batch_count),
        ("limits.max_compare_models", limits.max_compare_models),
        ("limits.max_concurrent_jobs", limits.max_concurrent_jobs),
    ] {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!("{} cannot be 0", name)));
        }
    }

    if config.limits.max_compare_models < 2 {
        return Err(ConfigError::ValidationError(
            "limits.max_compare_models must allow at least 2 models".to_string(),
        ));
    }

    let orch = &config.orchestrator;
    if orch.silence_window_ms == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.silence_window_ms cannot be 0".to_string(),
        ));
    }
    if orch.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.poll_interval_ms cannot be 0".to_string(),
        ));
    }
    if orch.queue_start_timeout_secs > orch.pipeline_timeout_secs
        || orch.queue_start_timeout_secs > orch.fanout_pipeline_timeout_secs
    {
        return Err(ConfigError::ValidationError(
            "orchestrator.queue_start_timeout_secs exceeds a pipeline timeout".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_concurrency_fails() {
        let mut config = Config::default();
        config.limits.max_concurrent_jobs = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(
            matches!(err, ConfigError::ValidationError(ref m) if m.contains("max_concurrent_jobs"))
        );
    }

    #[test]
    fn test_validate_single_compare_model_fails() {
        let mut config = Config::default();
        config.limits.max_compare_models = 1;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_silence_window_fails() {
        let mut config = Config::default();
        config.orchestrator.silence_window_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_queue_timeout_longer_than_pipeline_fails() {
        let mut config = Config::default();
        config.orchestrator.queue_start_timeout_secs = 400;
        config.orchestrator.pipeline_timeout_secs = 360;
        assert!(validate_config(&config).is_err());
    }
}
