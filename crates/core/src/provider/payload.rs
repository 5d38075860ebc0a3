//! Interpretation of provider JSON payloads.
//!
//! Queue APIs are loose about field names, so every extractor walks a short
//! list of candidate paths, first at the top level and then under a nested
//! `data` object.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde_json::Value;

use crate::job::{JobResult, Phase, StatusEvent};
use crate::media::detect_type_and_ext;

use super::types::ProviderError;

const MEDIA_KEYS: &[&str] = &[
    "images", "videos", "audio", "url", "image", "video", "result", "output",
];

const COST_PATHS: &[&[&str]] = &[
    &["cost_usd"],
    &["cost"],
    &["usage", "cost_usd"],
    &["usage", "cost"],
    &["usage", "total_cost"],
    &["metrics", "cost"],
];

const DURATION_PATHS: &[&[&str]] = &[
    &["duration_ms"],
    &["latency_ms"],
    &["timings", "duration_ms"],
    &["timings", "total_ms"],
    &["metrics", "duration_ms"],
];

static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("number pattern is valid"));

/// Top-level object followed by its nested `data` object, if any.
fn sources(payload: &Value) -> impl Iterator<Item = &Value> {
    std::iter::once(payload).chain(payload.get("data").filter(|d| d.is_object()))
}

fn get_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |cursor, key| cursor.get(key))
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Null | Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

/// Upper-cased status string, preferring the nested `data` object.
pub fn status_string(payload: &Value) -> String {
    let from = |v: &Value| non_empty_str(v.get("status")).or_else(|| non_empty_str(v.get("state")));
    payload
        .get("data")
        .filter(|d| d.is_object())
        .and_then(from)
        .or_else(|| from(payload))
        .unwrap_or_default()
        .to_uppercase()
}

/// Maps a provider status string to a phase.
///
/// Unrecognised non-terminal strings count as running.
pub fn phase_from_status(status: &str) -> Phase {
    match status {
        "IN_QUEUE" | "QUEUED" => Phase::Queued,
        "COMPLETED" => Phase::Succeeded,
        "FAILED" | "ERROR" => Phase::Failed,
        _ => Phase::Running,
    }
}

/// Percent complete, with fractions in `[0, 1]` scaled up and the result
/// clamped to `[0, 100]`.
pub fn progress(payload: &Value) -> Option<f32> {
    let source = payload
        .get("data")
        .filter(|d| d.is_object())
        .unwrap_or(payload);
    let raw = ["progress", "progress_percent", "percentage"]
        .iter()
        .find_map(|key| source.get(*key).filter(|v| !v.is_null()))
        .or_else(|| get_path(source, &["metrics", "progress"]))?;

    let value = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    let percent = if (0.0..=1.0).contains(&value) {
        value * 100.0
    } else {
        value
    };
    Some(percent.clamp(0.0, 100.0) as f32)
}

fn error_detail(payload: &Value) -> Option<String> {
    sources(payload).find_map(|source| {
        non_empty_str(source.get("error"))
            .or_else(|| non_empty_str(source.get("detail")))
    })
}

/// Builds a status event from a status payload (poll response or SSE frame).
pub fn status_event(payload: &Value) -> StatusEvent {
    let phase = phase_from_status(&status_string(payload));
    let mut event = StatusEvent::new(phase);
    event.progress = match phase {
        Phase::Succeeded => Some(100.0),
        _ => progress(payload),
    };
    if phase == Phase::Failed {
        event.error_detail = error_detail(payload).or_else(|| Some(payload.to_string()));
    }
    event
}

/// `request_id` (or `requestId`) from a submission response.
pub fn request_id(payload: &Value) -> Option<String> {
    non_empty_str(payload.get("request_id")).or_else(|| non_empty_str(payload.get("requestId")))
}

fn collect_urls(value: &Value, urls: &mut Vec<String>) {
    match value {
        Value::String(s) if s.starts_with("http://") || s.starts_with("https://") => {
            urls.push(s.clone());
        }
        Value::Object(map) => {
            for key in MEDIA_KEYS {
                if let Some(inner) = map.get(*key) {
                    collect_urls(inner, urls);
                }
            }
            for inner in map.values() {
                collect_urls(inner, urls);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_urls(item, urls);
            }
        }
        _ => {}
    }
}

/// First media URL in a result payload.
///
/// Walks media-bearing keys first and prefers URLs with a recognised media
/// extension; otherwise returns the first URL found.
pub fn first_media_url(payload: &Value) -> Option<String> {
    let mut urls = Vec::new();
    collect_urls(payload, &mut urls);
    urls.iter()
        .find(|url| detect_type_and_ext(url, None).0.is_known())
        .or_else(|| urls.first())
        .cloned()
}

/// Cost in USD, from a number or a numeric string.
pub fn cost_usd(payload: &Value) -> Option<f64> {
    sources(payload).find_map(|source| {
        COST_PATHS.iter().find_map(|path| match get_path(source, path)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => NUMBER.find(s).and_then(|m| m.as_str().parse().ok()),
            _ => None,
        })
    })
}

/// Duration in milliseconds.
pub fn duration_ms(payload: &Value) -> Option<u64> {
    sources(payload).find_map(|source| {
        DURATION_PATHS.iter().find_map(|path| {
            let ms = match get_path(source, path)? {
                Value::Number(n) => n.as_f64()?,
                Value::String(s) => s.trim().parse::<f64>().ok()?,
                _ => return None,
            };
            (ms >= 0.0).then_some(ms as u64)
        })
    })
}

/// Builds a [`JobResult`] from a result payload.
pub fn job_result(payload: &Value) -> Result<JobResult, ProviderError> {
    let result_url = first_media_url(payload).ok_or_else(|| {
        ProviderError::InvalidResponse("No media URL found in result payload".to_string())
    })?;
    let (media_type, _) = detect_type_and_ext(&result_url, None);
    Ok(JobResult {
        media_type,
        cost_usd: cost_usd(payload),
        duration_ms: duration_ms(payload),
        result_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaType;
    use serde_json::json;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_event(&json!({"status": "IN_QUEUE"})).phase, Phase::Queued);
        assert_eq!(status_event(&json!({"state": "running"})).phase, Phase::Running);
        assert_eq!(status_event(&json!({"status": "IN_PROGRESS"})).phase, Phase::Running);
        assert_eq!(
            status_event(&json!({"data": {"status": "completed"}})).phase,
            Phase::Succeeded
        );
        let failed = status_event(&json!({"status": "FAILED", "error": "nsfw"}));
        assert_eq!(failed.phase, Phase::Failed);
        assert_eq!(failed.error_detail.as_deref(), Some("nsfw"));
    }

    #[test]
    fn test_nested_status_wins() {
        let payload = json!({"status": "IN_QUEUE", "data": {"status": "COMPLETED"}});
        assert_eq!(status_string(&payload), "COMPLETED");
    }

    #[test]
    fn test_progress_scaling() {
        assert_eq!(progress(&json!({"progress": 0.5})), Some(50.0));
        assert_eq!(progress(&json!({"progress_percent": 42})), Some(42.0));
        assert_eq!(progress(&json!({"percentage": 250})), Some(100.0));
        assert_eq!(progress(&json!({"metrics": {"progress": "0.25"}})), Some(25.0));
        assert_eq!(progress(&json!({"status": "IN_QUEUE"})), None);
        assert_eq!(status_event(&json!({"status": "COMPLETED"})).progress, Some(100.0));
    }

    #[test]
    fn test_first_media_url_prefers_known_extension() {
        let payload = json!({
            "log_url": "https://example.com/logs",
            "images": [{"url": "https://cdn.example.com/a/out.png", "width": 512}]
        });
        assert_eq!(
            first_media_url(&payload).as_deref(),
            Some("https://cdn.example.com/a/out.png")
        );

        let unknown = json!({"output": "https://cdn.example.com/blob"});
        assert_eq!(
            first_media_url(&unknown).as_deref(),
            Some("https://cdn.example.com/blob")
        );

        assert!(first_media_url(&json!({"seed": 1})).is_none());
    }

    #[test]
    fn test_cost_and_duration() {
        let payload = json!({
            "usage": {"cost": "$0.035"},
            "data": {"timings": {"total_ms": 1234.7}}
        });
        assert_eq!(cost_usd(&payload), Some(0.035));
        assert_eq!(duration_ms(&payload), Some(1234));

        assert_eq!(cost_usd(&json!({"cost_usd": 0.1})), Some(0.1));
        assert_eq!(cost_usd(&json!({})), None);
        assert_eq!(duration_ms(&json!({"latency_ms": "88"})), Some(88));
    }

    #[test]
    fn test_job_result() {
        let payload = json!({
            "video": {"url": "https://cdn.example.com/v/clip.mp4"},
            "cost_usd": 0.4
        });
        let result = job_result(&payload).unwrap();
        assert_eq!(result.media_type, MediaType::Video);
        assert_eq!(result.cost_usd, Some(0.4));
        assert_eq!(result.duration_ms, None);

        assert!(matches!(
            job_result(&json!({"status": "COMPLETED"})),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_request_id() {
        assert_eq!(request_id(&json!({"request_id": "abc"})).as_deref(), Some("abc"));
        assert_eq!(request_id(&json!({"requestId": "xyz"})).as_deref(), Some("xyz"));
        assert_eq!(request_id(&json!({"request_id": ""})), None);
    }
}
