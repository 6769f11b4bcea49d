//! Configuration Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. See `ERRORS.md` for design rationale.

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories. All of these fail startup fast, before any
/// request is served, rather than surfacing mid-request as a panic.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// `figment` couldn't merge the defaults/file/env layers, or couldn't
    /// deserialize the merged document into [`crate::Settings`].
    #[display("failed to load configuration: {_0}")]
    Load(#[error(not(source))] String),
    /// A field parsed but fails a semantic constraint (range, format).
    #[display("invalid configuration value for `{field}`: {reason}")]
    InvalidValue {
        #[error(not(source))]
        field: &'static str,
        #[error(not(source))]
        reason: String,
    },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed. Configuration errors never
    /// are: the same file and environment produce the same bad value again.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
