//! Testing utilities and a scriptable provider for lifecycle tests.
//!
//! Pipelines run against [`MockProvider`] and write real files, so tests can
//! assert on what ends up on disk.
//!
//! # Example
//!
//! ```rust,ignore
//! use genvoy_core::testing::{MockJobScript, MockProvider};
//!
//! let provider = MockProvider::new();
//! provider.set_script("fal-ai/b", MockJobScript::failing("nsfw")).await;
//!
//! // Build an orchestrator over Arc::new(provider.clone()) and run jobs...
//! ```

mod mock_provider;

pub use mock_provider::{MockJobScript, MockProvider, RecordedCall, RecordedSubmit, StreamBehavior};

/// Test fixtures and helper functions.
pub mod fixtures {
    use serde_json::{Map, Value};

    use crate::job::JobRequest;

    /// Default model id used across tests.
    pub const MODEL_ID: &str = "fal-ai/flux/dev";

    /// A request for `model_id` with a fixed prompt.
    pub fn request(model_id: &str) -> JobRequest {
        JobRequest::new(model_id, "a red fox in the snow")
    }

    /// A request carrying a seed parameter.
    pub fn seeded_request(model_id: &str, seed: u64) -> JobRequest {
        let mut params = Map::new();
        params.insert("seed".to_string(), Value::from(seed));
        request(model_id).with_parameters(params)
    }
}
