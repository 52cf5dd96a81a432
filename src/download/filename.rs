//! Filename derivation and sanitization for downloaded media.
//!
//! Media files are named `{detail_id}_{caption}` with a `_{n}` suffix when an
//! item has more than one file; the extension comes from the URL path or, when
//! the path has none, from the response `Content-Type`.

use std::path::{Path, PathBuf};

use url::Url;

/// Maximum number of caption characters kept in a file name.
const MAX_CAPTION_CHARS: usize = 50;

/// Suffix of in-progress downloads.
pub(crate) const PARTIAL_SUFFIX: &str = "part";

/// Builds the file stem shared by all media files of an item.
#[must_use]
pub fn item_file_stem(detail_id: &str, caption: &str) -> String {
    let id = sanitize_filename_component(detail_id);
    let caption: String = sanitize_filename_component(caption)
        .chars()
        .take(MAX_CAPTION_CHARS)
        .collect();
    let caption = caption.trim_matches('_');
    match (id.is_empty(), caption.is_empty()) {
        (false, false) => format!("{id}_{caption}"),
        (false, true) => id,
        (true, false) => caption.to_string(),
        (true, true) => "download".to_string(),
    }
}

/// Stem of the `index`-th (0-based) file when an item has `count` files.
#[must_use]
pub fn media_file_stem(stem: &str, index: usize, count: usize) -> String {
    if count > 1 {
        format!("{stem}_{}", index + 1)
    } else {
        stem.to_string()
    }
}

/// Path of the in-progress file for `target`.
pub(crate) fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Stem of an item's cover image.
#[must_use]
pub fn cover_file_stem(stem: &str) -> String {
    format!("{stem}_cover")
}

/// Finds a finished file in `dir` whose stem is exactly `stem`.
///
/// The extension is not known before the response arrives, so the directory
/// is scanned rather than probed for one path.
pub(crate) async fn find_existing(dir: &Path, stem: &str) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.file_stem().and_then(|s| s.to_str()) != Some(stem)
            || path.extension().and_then(|e| e.to_str()) == Some(PARTIAL_SUFFIX)
        {
            continue;
        }
        if entry.file_type().await.is_ok_and(|t| t.is_file()) {
            return Some(path);
        }
    }
    None
}

pub(crate) fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let dot_index = last_segment.rfind('.')?;
    let ext = &last_segment[dot_index..];
    if ext.len() <= 1 || ext.len() > 6 || !ext[1..].chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_lowercase())
}

pub(crate) fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\'' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c if c.is_alphanumeric() || matches!(c, '-' | '_') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches('_').to_string()
}

/// Guess file extension from Content-Type header.
pub(crate) fn extension_from_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match mime.as_str() {
        "video/mp4" => ".mp4",
        "video/quicktime" => ".mov",
        "video/webm" => ".webm",
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/webp" => ".webp",
        "image/gif" => ".gif",
        "image/heic" => ".heic",
        "audio/mpeg" => ".mp3",
        "audio/mp4" | "audio/x-m4a" => ".m4a",
        _ => ".bin",
    }
}
