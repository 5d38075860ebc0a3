//! Caller input validation.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use thiserror::Error;

static MODEL_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[A-Za-z0-9][A-Za-z0-9._-]*/[A-Za-z0-9][A-Za-z0-9._-]*(/[A-Za-z0-9][A-Za-z0-9._-]*)*$",
    )
    .expect("model id pattern is valid")
});

/// Errors raised before any pipeline is launched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid model ID format: {0}")]
    InvalidModelId(String),

    #[error("Prompt exceeds maximum length ({len} > {max})")]
    PromptTooLong { len: usize, max: usize },

    #[error("Batch count {count} outside 1..={max}")]
    InvalidCount { count: usize, max: usize },

    #[error("Compare needs {min}..={max} models, got {count}")]
    InvalidModelCount { count: usize, min: usize, max: usize },

    #[error("{0}")]
    Other(String),
}

pub fn validate_model_id(model_id: &str) -> Result<(), ValidationError> {
    if MODEL_ID_PATTERN.is_match(model_id) {
        Ok(())
    } else {
        Err(ValidationError::InvalidModelId(model_id.to_string()))
    }
}

/// Length is counted in characters, not bytes.
pub fn validate_prompt(prompt: &str, max_len: usize) -> Result<(), ValidationError> {
    let len = prompt.chars().count();
    if len > max_len {
        return Err(ValidationError::PromptTooLong { len, max: max_len });
    }
    Ok(())
}

pub fn validate_batch_count(count: usize, max: usize) -> Result<(), ValidationError> {
    if count == 0 || count > max {
        return Err(ValidationError::InvalidCount { count, max });
    }
    Ok(())
}

pub fn validate_compare_models(model_ids: &[String], max: usize) -> Result<(), ValidationError> {
    const MIN_MODELS: usize = 2;
    if model_ids.len() < MIN_MODELS || model_ids.len() > max {
        return Err(ValidationError::InvalidModelCount {
            count: model_ids.len(),
            min: MIN_MODELS,
            max,
        });
    }
    model_ids.iter().try_for_each(|id| validate_model_id(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_model_ids() {
        for id in ["fal-ai/flux/dev", "owner/model", "a1/b.c_d-e", "x/y/z/w"] {
            assert!(validate_model_id(id).is_ok(), "{} should be valid", id);
        }
    }

    #[test]
    fn test_invalid_model_ids() {
        for id in ["", "noslash", "/leading", "a//b", "a/b/", "-a/b", "a/b c", "../etc"] {
            assert!(validate_model_id(id).is_err(), "{} should be invalid", id);
        }
    }

    #[test]
    fn test_prompt_length_counts_chars() {
        assert!(validate_prompt("héllo", 5).is_ok());
        assert_eq!(
            validate_prompt("héllo!", 5),
            Err(ValidationError::PromptTooLong { len: 6, max: 5 })
        );
    }

    #[test]
    fn test_batch_count_bounds() {
        assert!(validate_batch_count(1, 10).is_ok());
        assert!(validate_batch_count(10, 10).is_ok());
        assert!(validate_batch_count(0, 10).is_err());
        assert!(validate_batch_count(11, 10).is_err());
    }

    #[test]
    fn test_compare_model_bounds() {
        let one = vec!["a/b".to_string()];
        let two = vec!["a/b".to_string(), "c/d".to_string()];
        let bad = vec!["a/b".to_string(), "nope".to_string()];

        assert!(matches!(
            validate_compare_models(&one, 6),
            Err(ValidationError::InvalidModelCount { count: 1, .. })
        ));
        assert!(validate_compare_models(&two, 6).is_ok());
        assert!(validate_compare_models(&two, 1).is_err());
        assert!(matches!(
            validate_compare_models(&bad, 6),
            Err(ValidationError::InvalidModelId(_))
        ));
    }
}
