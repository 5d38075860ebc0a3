use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides.
///
/// Environment variables are prefixed with `GENVOY_` and use `__` between
/// nested keys, e.g. `GENVOY_LIMITS__MAX_CONCURRENT_JOBS=4`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("GENVOY_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[limits]
max_concurrent_jobs = 3

[orchestrator]
silence_window_ms = 500
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.limits.max_concurrent_jobs, 3);
        assert_eq!(config.limits.max_batch_count, 10);
        assert_eq!(config.orchestrator.silence_window_ms, 500);
    }

    #[test]
    fn test_load_config_from_str_empty_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.limits.max_prompt_length, 10_000);
        assert_eq!(config.provider.queue_url, "https://queue.fal.run");
    }

    #[test]
    fn test_load_config_from_str_bad_type() {
        let toml = r#"
[limits]
max_batch_count = "lots"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/genvoy.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[provider]
api_key = "abc123"

[output]
allowed_root = "/srv/assets"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.provider.api_key, "abc123");
        assert_eq!(config.output.allowed_root.to_str().unwrap(), "/srv/assets");
    }
}
