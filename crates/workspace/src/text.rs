use std::path::{Path, PathBuf};

use crate::errors::WorkspaceError;

pub const MIN_READ_CHARS: usize = 500;
pub const MAX_READ_CHARS: usize = 600_000;
pub const TRUNCATED_SUFFIX: &str = "\n... (truncated)\n";
pub const LARGE_PREVIEW_SUFFIX: &str = "\n... (preview: file is large; open full file to edit)\n";

const BINARY_SAMPLE_BYTES: usize = 8192;
const BINARY_NON_TEXT_RATIO: f64 = 0.30;

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "ico", "pdf", "zip", "gz", "tgz", "bz2", "7z",
    "rar", "jar", "war", "class", "o", "so", "dylib", "dll", "exe", "bin", "woff", "woff2", "ttf",
    "eot", "mp3", "mp4", "mov", "avi", "wav", "ogg", "psd",
];

/// Normalizes a repository-relative path: forward slashes, no leading `./` or `/`,
/// and no empty, `.` or `..` segments.
pub fn normalize_rel_path(raw: &str) -> Result<String, WorkspaceError> {
    let mut path = raw.trim().replace('\\', "/");
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    let path = path.trim_start_matches('/').to_string();

    if path.is_empty() {
        return Err(WorkspaceError::InvalidPath { path, reason: "path is required" });
    }
    if path.split('/').any(|segment| matches!(segment, "" | "." | "..")) {
        return Err(WorkspaceError::InvalidPath {
            path,
            reason: "path segments must not be empty, `.` or `..`",
        });
    }
    Ok(path)
}

/// Joins `rel_path` under `root`, refusing results that resolve outside the root
/// (including through symlinked ancestors).
pub fn safe_join(root: &Path, rel_path: &str) -> Result<PathBuf, WorkspaceError> {
    let root = root.canonicalize().map_err(|source| WorkspaceError::io(root, source))?;
    let joined = root.join(rel_path);

    let mut existing = joined.as_path();
    while !existing.exists() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => break,
        }
    }
    let resolved = existing.canonicalize().map_err(|source| WorkspaceError::io(existing, source))?;
    if !resolved.starts_with(&root) {
        return Err(WorkspaceError::InvalidPath {
            path: rel_path.to_string(),
            reason: "path escapes repository root",
        });
    }
    Ok(joined)
}

pub fn is_binary_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Sniffs the first 8 KiB: NUL means binary, valid UTF-8 means text, otherwise
/// binary when more than 30% of the sample is outside printable ASCII and common controls.
/// A multi-byte character cut off by the sample boundary still counts as valid UTF-8.
pub fn looks_binary(raw: &[u8]) -> bool {
    if raw.is_empty() {
        return false;
    }
    let sample = &raw[..raw.len().min(BINARY_SAMPLE_BYTES)];
    if sample.contains(&0) {
        return true;
    }
    match std::str::from_utf8(sample) {
        Ok(_) => return false,
        Err(error) if error.error_len().is_none() && sample.len() < raw.len() => return false,
        Err(_) => {}
    }
    let non_text = sample
        .iter()
        .filter(|byte| !matches!(**byte, 7 | 8 | 9 | 10 | 12 | 13 | 27 | 0x20..=0x7e))
        .count();
    (non_text as f64 / sample.len() as f64) > BINARY_NON_TEXT_RATIO
}

pub fn clamp_max_chars(requested: Option<usize>, default: usize) -> usize {
    requested.unwrap_or(default).clamp(MIN_READ_CHARS, MAX_READ_CHARS)
}

/// Returns the first `max_chars` characters and whether anything was cut.
pub fn take_chars(content: &str, max_chars: usize) -> (&str, bool) {
    match content.char_indices().nth(max_chars) {
        Some((offset, _)) => (&content[..offset], true),
        None => (content, false),
    }
}
