//! Path validation and security utilities.
//!
//! This module provides functions to validate storage paths and prevent
//! security issues like path traversal attacks.

use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path for security and correctness.
///
/// Collapses runs of `\`/`/` into a single separator, strips leading and
/// trailing separators, and rejects the path outright if any segment is
/// exactly `..` — this is a hard rejection, not a resolution: a path that
/// would stay within the root after resolving `a/b/..` down to `a` is
/// rejected all the same.
///
/// > **Note:** This does **not** normalize non-UTF8 bytes or other
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use ledger_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("Fandom/work.html.bz2").is_ok());
/// assert!(validate_path("a/b/c/file.html").is_ok());
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../b").is_err());
/// assert!(validate_path("a\0b").is_err());
/// // Redundant separators are collapsed
/// assert_eq!(
///     validate_path("correct//./path.html/").unwrap(),
///     Path::new("correct/path.html")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    // Use Rust's built-in path component parser for robust handling. Means we
    // don't have to deal with non-UTF8, or the maniacs on Unix that use
    // backslashes in their filenames.
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls — reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            // Yeah, fuck off Windows.
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Sanitizes a user-supplied filename down to a safe leaf name.
///
/// Percent-decodes the input, strips any directory components a client
/// tried to sneak in (keeping only the final segment), and replaces every
/// character outside `[A-Za-z0-9_.-]` with `_`. Rejects empty, `.`, and `..`
/// results.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let decoded = percent_decode_str(name).decode_utf8_lossy().into_owned();
    let leaf = decoded.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if leaf.is_empty() || leaf == "." || leaf == ".." {
        exn::bail!(ErrorKind::InvalidFilename(name.to_string()));
    }
    let cleaned: String = leaf
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        exn::bail!(ErrorKind::InvalidFilename(name.to_string()));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        assert_eq!(validate(Path::new("Fandom/work.html.bz2")).unwrap(), Path::new("Fandom/work.html.bz2"));
        assert_eq!(validate(Path::new("a/b/c/file.html")).unwrap(), Path::new("a/b/c/file.html"));
        assert_eq!(validate(Path::new("simple.html")).unwrap(), Path::new("simple.html"));
    }

    #[test]
    fn test_path_normalization() {
        // Double slashes are normalized
        assert_eq!(validate(Path::new("a//b//c")).unwrap(), Path::new("a/b/c"));
        // Current directory references removed
        assert_eq!(validate(Path::new("a/./b/./c")).unwrap(), Path::new("a/b/c"));
    }

    #[cfg(windows)]
    #[test]
    fn test_backslash_normalization() {
        // On Windows, backslashes are path separators and get normalized
        assert_eq!(validate(Path::new("a\\b\\c")).unwrap(), Path::new("a/b/c"));
        assert_eq!(validate(Path::new("a\\b/c\\d")).unwrap(), Path::new("a/b/c/d"));
    }

    #[test]
    fn test_traversal_attempts() {
        // Basic parent directory reference
        assert!(validate(Path::new("../etc/passwd")).is_err());
        // Traversal in the middle
        assert!(validate(Path::new("a/../../b")).is_err());
        // Only parent references
        assert!(validate(Path::new("..")).is_err());
        assert!(validate(Path::new("../..")).is_err());
    }

    #[test]
    fn test_reverse_attempts() {
        // Rejected outright, even though it would stay within the root
        assert!(validate(Path::new("a/b/..")).is_err());
    }

    #[test]
    fn test_invalid_characters() {
        // Null byte
        assert!(validate(Path::new("a\0b")).is_err());
        assert!(validate(Path::new("\0")).is_err());
    }

    #[test]
    fn test_empty_paths() {
        // Empty string
        assert!(validate(Path::new("")).is_err());
        // Only dots and slashes (normalizes to empty)
        assert!(validate(Path::new(".")).is_err());
        assert!(validate(Path::new("./")).is_err());
        assert!(validate(Path::new("./.")).is_err());
        assert!(validate(Path::new("//")).is_err());
    }

    #[test]
    fn test_trailing_slashes() {
        // Trailing slashes should be stripped
        assert_eq!(validate(Path::new("Fandom1/")).unwrap(), Path::new("Fandom1"));
        assert_eq!(validate(Path::new("a/b/c/")).unwrap(), Path::new("a/b/c"));
        assert_eq!(validate(Path::new("file.html/")).unwrap(), Path::new("file.html"));
        // Multiple trailing slashes
        assert_eq!(validate(Path::new("Fandom1///")).unwrap(), Path::new("Fandom1"));
    }

    #[test]
    fn test_sanitize_filename_happy_path() {
        assert_eq!(sanitize_filename("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_filename("my file (final).txt").unwrap(), "my_file__final_.txt");
    }

    #[test]
    fn test_sanitize_filename_percent_decodes() {
        assert_eq!(sanitize_filename("hello%20world.txt").unwrap(), "hello_world.txt");
    }

    #[test]
    fn test_sanitize_filename_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("a/b/c.txt").unwrap(), "c.txt");
    }

    #[test]
    fn test_sanitize_filename_rejects_empty_or_dots() {
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename(".").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("../").is_err());
    }
}
