//! File type detection.
//!
//! Determines the MIME type and media class of an uploaded file from its
//! filename (primarily) and a byte prefix (as a tiebreaker / sanity check).
//! The media class in turn decides the base path an asset is stored under.

use std::fmt;

/// Coarse classification used to pick an object-store base path and a
/// vector-mirror collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaClass {
    Video,
    Audio,
    Image,
    Document,
    Other,
}

impl MediaClass {
    /// Base path segment an asset of this class is stored under.
    pub fn base_path(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Document => "document",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for MediaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base_path())
    }
}

/// Result of classifying a file.
#[derive(Debug, Clone)]
pub struct FileType {
    pub mime_type: String,
    pub media_class: MediaClass,
}

/// Extension-to-type table. Order doesn't matter; lookups are by exact
/// lowercase extension match.
const EXTENSION_TABLE: &[(&str, &str, MediaClass)] = &[
    ("mp4", "video/mp4", MediaClass::Video),
    ("mov", "video/quicktime", MediaClass::Video),
    ("mkv", "video/x-matroska", MediaClass::Video),
    ("webm", "video/webm", MediaClass::Video),
    ("avi", "video/x-msvideo", MediaClass::Video),
    ("mp3", "audio/mpeg", MediaClass::Audio),
    ("wav", "audio/wav", MediaClass::Audio),
    ("flac", "audio/flac", MediaClass::Audio),
    ("ogg", "audio/ogg", MediaClass::Audio),
    ("m4a", "audio/mp4", MediaClass::Audio),
    ("png", "image/png", MediaClass::Image),
    ("jpg", "image/jpeg", MediaClass::Image),
    ("jpeg", "image/jpeg", MediaClass::Image),
    ("gif", "image/gif", MediaClass::Image),
    ("webp", "image/webp", MediaClass::Image),
    ("svg", "image/svg+xml", MediaClass::Image),
    ("pdf", "application/pdf", MediaClass::Document),
    ("doc", "application/msword", MediaClass::Document),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document", MediaClass::Document),
    ("txt", "text/plain", MediaClass::Document),
    ("md", "text/markdown", MediaClass::Document),
    ("csv", "text/csv", MediaClass::Document),
    ("json", "application/json", MediaClass::Document),
];

/// Magic-byte prefixes, used only to break ties or confirm an extensionless
/// upload. Checked against the start of the content (see [`classify`]).
const MAGIC_TABLE: &[(&[u8], &str, MediaClass)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png", MediaClass::Image),
    (b"\xff\xd8\xff", "image/jpeg", MediaClass::Image),
    (b"GIF87a", "image/gif", MediaClass::Image),
    (b"GIF89a", "image/gif", MediaClass::Image),
    (b"%PDF-", "application/pdf", MediaClass::Document),
    (b"ID3", "audio/mpeg", MediaClass::Audio),
    (b"fLaC", "audio/flac", MediaClass::Audio),
    (b"OggS", "audio/ogg", MediaClass::Audio),
];

/// Classify a file by its (sanitized) name, and optionally confirm via a
/// byte prefix of its content. Extension wins on conflict; a byte prefix is
/// only consulted when the extension is missing or unrecognized.
pub fn classify(filename: &str, content_prefix: Option<&[u8]>) -> FileType {
    let extension = filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    if let Some(ext) = extension.as_deref() {
        if let Some((_, mime, class)) = EXTENSION_TABLE.iter().find(|(e, _, _)| *e == ext) {
            return FileType { mime_type: mime.to_string(), media_class: *class };
        }
    }
    if let Some(prefix) = content_prefix {
        for (magic, mime, class) in MAGIC_TABLE {
            if prefix.starts_with(magic) {
                return FileType { mime_type: mime.to_string(), media_class: *class };
            }
        }
    }
    FileType { mime_type: "application/octet-stream".to_string(), media_class: MediaClass::Other }
}

/// The asset path stem: filename without its final extension.
pub fn stem(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => filename,
    }
}
