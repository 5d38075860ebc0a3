//! Media type and file extension detection.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Kind of generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Unknown,
}

impl MediaType {
    pub fn is_known(&self) -> bool {
        !matches!(self, MediaType::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a file extension (no leading dot, any case) to a media type.
pub fn media_type_for_extension(ext: &str) -> MediaType {
    match ext.to_ascii_lowercase().as_str() {
        "png" | "jpg" | "jpeg" | "webp" => MediaType::Image,
        "mp4" => MediaType::Video,
        "mp3" | "wav" | "flac" => MediaType::Audio,
        _ => MediaType::Unknown,
    }
}

/// Canonical extension for a `Content-Type` header value.
///
/// Parameters such as `; charset=utf-8` are ignored.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "audio/mpeg" => Some("mp3"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/flac" => Some("flac"),
        _ => None,
    }
}

/// Lowercased extension of the URL's path component, ignoring query and fragment.
pub fn url_extension(url: &str) -> Option<String> {
    let path = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Detects media type and extension for a downloaded artifact.
///
/// A recognised URL extension wins; the content type is the fallback.
pub fn detect_type_and_ext(url: &str, content_type: Option<&str>) -> (MediaType, Option<String>) {
    if let Some(ext) = url_extension(url) {
        let media_type = media_type_for_extension(&ext);
        if media_type.is_known() {
            return (media_type, Some(ext));
        }
    }

    match content_type.and_then(extension_for_content_type) {
        Some(ext) => (media_type_for_extension(ext), Some(ext.to_string())),
        None => (MediaType::Unknown, None),
    }
}

static SLUG_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9._-]+").expect("slug pattern is valid"));

/// File-name-safe slug for a model id: `fal-ai/flux/dev` -> `fal-ai-flux-dev`.
pub fn slugify_model_id(model_id: &str) -> String {
    SLUG_SEPARATORS
        .replace_all(model_id, "-")
        .trim_matches('-')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_from_url_extension() {
        let (media, ext) =
            detect_type_and_ext("https://cdn.example.com/file/output.mp4?token=abc", None);
        assert_eq!(media, MediaType::Video);
        assert_eq!(ext.as_deref(), Some("mp4"));
    }

    #[test]
    fn test_detect_from_content_type_fallback() {
        let (media, ext) = detect_type_and_ext(
            "https://cdn.example.com/file/noext",
            Some("image/png; charset=utf-8"),
        );
        assert_eq!(media, MediaType::Image);
        assert_eq!(ext.as_deref(), Some("png"));
    }

    #[test]
    fn test_unknown_extension_falls_back_to_content_type() {
        let (media, ext) =
            detect_type_and_ext("https://cdn.example.com/a/result.bin", Some("audio/x-wav"));
        assert_eq!(media, MediaType::Audio);
        assert_eq!(ext.as_deref(), Some("wav"));
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(
            detect_type_and_ext("https://cdn.example.com/blob", Some("application/octet-stream")),
            (MediaType::Unknown, None)
        );
        assert_eq!(
            detect_type_and_ext("https://cdn.example.com/blob", None),
            (MediaType::Unknown, None)
        );
    }

    #[test]
    fn test_uppercase_extension() {
        let (media, ext) = detect_type_and_ext("https://cdn.example.com/IMG.JPEG", None);
        assert_eq!(media, MediaType::Image);
        assert_eq!(ext.as_deref(), Some("jpeg"));
    }

    #[test]
    fn test_slugify_model_id() {
        assert_eq!(slugify_model_id("fal-ai/flux/dev"), "fal-ai-flux-dev");
        assert_eq!(slugify_model_id("Owner/Model v2"), "owner-model-v2");
        assert_eq!(slugify_model_id("/a//b/"), "a-b");
        assert_eq!(slugify_model_id("x/y_1.5"), "x-y_1.5");
    }
}
