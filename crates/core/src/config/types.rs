use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::orchestrator::OrchestratorConfig;
use crate::placer::PlacerConfig;

use super::ConfigError;

/// Environment variable consulted when `provider.api_key` is empty.
pub const CREDENTIAL_ENV_VAR: &str = "FAL_KEY";

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub placer: PlacerConfig,
}

/// Queue provider connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Raw API key. Empty means "read FAL_KEY".
    #[serde(default)]
    pub api_key: String,
    /// Base URL of the queue API.
    #[serde(default = "default_queue_url")]
    pub queue_url: String,
    /// Timeout for individual API calls (submit, poll, result, cancel).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Timeout for a whole artifact download.
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            queue_url: default_queue_url(),
            request_timeout_secs: default_request_timeout(),
            download_timeout_secs: default_download_timeout(),
        }
    }
}

fn default_queue_url() -> String {
    "https://queue.fal.run".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_download_timeout() -> u64 {
    120
}

impl ProviderConfig {
    /// Returns the Authorization header value, falling back to `FAL_KEY`.
    pub fn authorization(&self) -> Result<String, ConfigError> {
        normalize_credential(&self.api_key)
            .or_else(|| {
                std::env::var(CREDENTIAL_ENV_VAR)
                    .ok()
                    .and_then(|raw| normalize_credential(&raw))
            })
            .ok_or(ConfigError::MissingCredential)
    }
}

/// Trims a raw key and prefixes it with `Key ` unless already present.
pub fn normalize_credential(raw: &str) -> Option<String> {
    let key = raw.trim();
    if key.is_empty() {
        return None;
    }
    if key.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("key ")) {
        Some(key.to_string())
    } else {
        Some(format!("Key {}", key))
    }
}

/// Input and concurrency bounds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_prompt_length")]
    pub max_prompt_length: usize,
    #[serde(default = "default_max_batch_count")]
    pub max_batch_count: usize,
    #[serde(default = "default_max_compare_models")]
    pub max_compare_models: usize,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_prompt_length: default_max_prompt_length(),
            max_batch_count: default_max_batch_count(),
            max_compare_models: default_max_compare_models(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

fn default_max_prompt_length() -> usize {
    10_000
}

fn default_max_batch_count() -> usize {
    10
}

fn default_max_compare_models() -> usize {
    6
}

fn default_max_concurrent_jobs() -> usize {
    8
}

/// Where artifacts may be written
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Containment boundary for every output and copy path.
    #[serde(default = "default_allowed_root")]
    pub allowed_root: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            allowed_root: default_allowed_root(),
        }
    }
}

fn default_allowed_root() -> PathBuf {
    PathBuf::from(".")
}

/// Sanitized config for diagnostics (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub provider: SanitizedProviderConfig,
    pub limits: LimitsConfig,
    pub orchestrator: OrchestratorConfig,
    pub output: OutputConfig,
    pub placer: PlacerConfig,
}

/// Provider config with the API key hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedProviderConfig {
    pub api_key_configured: bool,
    pub queue_url: String,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            provider: SanitizedProviderConfig {
                api_key_configured: !config.provider.api_key.trim().is_empty(),
                queue_url: config.provider.queue_url.clone(),
                request_timeout_secs: config.provider.request_timeout_secs,
                download_timeout_secs: config.provider.download_timeout_secs,
            },
            limits: config.limits.clone(),
            orchestrator: config.orchestrator.clone(),
            output: config.output.clone(),
            placer: config.placer.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.limits.max_batch_count, 10);
        assert_eq!(config.limits.max_compare_models, 6);
        assert_eq!(config.limits.max_concurrent_jobs, 8);
        assert_eq!(config.provider.request_timeout_secs, 30);
        assert_eq!(config.output.allowed_root, PathBuf::from("."));
    }

    #[test]
    fn test_deserialize_partial_section() {
        let toml = r#"
[provider]
queue_url = "http://localhost:9000"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.provider.queue_url, "http://localhost:9000");
        assert_eq!(config.provider.download_timeout_secs, 120);
        assert!(config.provider.api_key.is_empty());
    }

    #[test]
    fn test_normalize_credential() {
        assert_eq!(normalize_credential("  abc  "), Some("Key abc".to_string()));
        assert_eq!(normalize_credential("Key abc"), Some("Key abc".to_string()));
        assert_eq!(normalize_credential("key abc"), Some("key abc".to_string()));
        assert_eq!(normalize_credential("   "), None);
        assert_eq!(normalize_credential(""), None);
    }

    #[test]
    fn test_authorization_prefers_configured_key() {
        let provider = ProviderConfig {
            api_key: "secret".to_string(),
            ..ProviderConfig::default()
        };
        assert_eq!(provider.authorization().unwrap(), "Key secret");
    }

    #[test]
    fn test_sanitized_config_hides_key() {
        let mut config = Config::default();
        config.provider.api_key = "secret-key".to_string();

        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.provider.api_key_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret-key"));
    }
}
