//! Vector Mirror Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. See `ERRORS.md` for design rationale.

use derive_more::{Display, Error};

/// A vector-mirror error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for vector-mirror operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Every one of these is caught and logged by the coordinator rather than
/// propagated to callers — the mirror is never allowed to fail a request.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// `asset_path`'s leading segment doesn't map to a known media class
    /// collection (i.e. it classified as `other`, which has no mirror).
    #[display("no vector collection for media class of asset path: {_0}")]
    UnmappedMediaClass(#[error(not(source))] String),
    /// The collection HTTP endpoint is unreachable or timed out.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The collection API responded with an error status.
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::BackendError(_))
    }
}
