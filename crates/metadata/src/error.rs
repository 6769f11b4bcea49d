//! Metadata Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. See `ERRORS.md` for design rationale.
//!
//! TODO: Definitely going to refactor this later once I've written a few
//!       more crates. Designing errors in Rust is **hard** and I don't want
//!       to resort to anyhow+thiserror just because I don't want to deal with it.

use derive_more::{Display, Error};

/// A metadata store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for metadata operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    #[display("asset not found: {_0} (version {_1}, branch {_2})")]
    AssetNotFound(#[error(not(source))] String, String, String),
    #[display("user not found: {_0}")]
    UserNotFound(#[error(not(source))] String),
    #[display("username already exists: {_0}")]
    DuplicateUser(#[error(not(source))] String),
    #[display("invalid permission set: {_0}")]
    InvalidPermissions(#[error(not(source))] String),
    /// Row data failed to (de)serialize into its Rust shape.
    #[display("invalid metadata row data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}
