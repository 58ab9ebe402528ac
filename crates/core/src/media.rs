//! Media classification of generated artifacts by file extension.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Fallback content type for unrecognized extensions.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Extension → content type lookup. Extensions are matched lowercase.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("gif", "image/gif"),
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
    ("mkv", "video/x-matroska"),
    ("avi", "video/x-msvideo"),
];

/// Extensions delivered as video. GIF counts as video: ComfyUI emits
/// animations under the `gifs` output key.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "gif", "webm", "mkv", "avi"];

/// Coarse media class reported in the upload result document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaClass {
    Image,
    Video,
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Resolve the `Content-Type` for an artifact from its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    extension(path)
        .and_then(|ext| {
            CONTENT_TYPES
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, ct)| *ct)
        })
        .unwrap_or(OCTET_STREAM)
}

/// Classify an artifact as image or video from its extension.
///
/// Anything not in the video list (including unknown extensions) is
/// treated as an image.
pub fn media_class_for(path: &Path) -> MediaClass {
    match extension(path) {
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => MediaClass::Video,
        _ => MediaClass::Image,
    }
}
