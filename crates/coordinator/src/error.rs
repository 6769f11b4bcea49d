//! Coordinator Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. See `ERRORS.md` for design rationale.

use derive_more::{Display, Error};

/// A coordinator error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories, matching the HTTP status an eventual thin
/// adapter would map each one to; this crate itself never produces an HTTP
/// response.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Sanitization failure, missing field, or a bad TTL. Maps to 400.
    #[display("invalid input: {_0}")]
    InvalidInput(#[error(not(source))] String),
    /// Permission missing, cross-branch access, or granting `admin` to a
    /// shared user. Maps to 403.
    #[display("forbidden: {_0}")]
    Forbidden(#[error(not(source))] String),
    /// Asset, version, or user absent. Maps to 404.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Wrong status for the requested transition. Maps to 400.
    #[display("precondition failed: {_0}")]
    PreconditionFailed(#[error(not(source))] String),
    /// Duplicate username. Maps to 400.
    #[display("conflict: {_0}")]
    Conflict(#[error(not(source))] String),
    /// Object store unreachable or returned an unrecoverable error. Maps to 500/503.
    #[display("storage error: {_0}")]
    StorageError(#[error(not(source))] String),
    /// Unclassified internal error (metadata store failure, serialization, ...). Maps to 500.
    #[display("internal error: {_0}")]
    Internal(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageError(_))
    }
}
