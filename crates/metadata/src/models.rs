//! Row and domain types for the metadata store.
//!
//! `commit_history` rows are mapped through a private [`AssetRow`] shape that
//! mirrors the SQLite columns exactly (JSON text column, Unix-seconds
//! timestamps) before being converted into the richer [`AssetRecord`] the
//! rest of the crate works with.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Every permission a user row can carry. `Admin` implies all the others.
pub const ALL_PERMISSIONS: &[&str] = &["upload", "download", "list", "archive", "destroy", "admin"];
/// Permissions a shared (non-admin) user may be granted.
pub const SHARED_USER_PERMISSIONS: &[&str] = &["upload", "download", "list", "archive", "destroy"];

/// Lifecycle status of an [`AssetRecord`]. Transitions only ever move
/// forward: `Active -> Archived -> Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Active,
    Archived,
    Destroyed,
}

impl AssetStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Destroyed => "destroyed",
        }
    }

    pub(crate) fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            "destroyed" => Ok(Self::Destroyed),
            _ => Err(ErrorKind::InvalidData("unrecognized asset status").into()),
        }
    }
}

/// One `(asset_path, version_id, branch)` row.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRecord {
    pub asset_path: String,
    pub version_id: String,
    pub branch: String,
    pub primary_filename: String,
    pub asset_key: String,
    /// `(filename, version_id)` pairs, newest write per filename wins.
    pub associated_filenames: Vec<(String, String)>,
    pub upload_date: OffsetDateTime,
    pub archive_date: Option<OffsetDateTime>,
    pub destroy_date: Option<OffsetDateTime>,
    pub status: AssetStatus,
    pub checksum: String,
}

impl AssetRecord {
    pub(crate) fn associated_filenames_json(&self) -> Result<String> {
        serde_json::to_string(&self.associated_filenames)
            .or_raise(|| ErrorKind::InvalidData("associated_filenames did not serialize"))
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct AssetRow {
    pub asset_path: String,
    pub version_id: String,
    pub branch: String,
    pub primary_filename: String,
    pub asset_key: String,
    pub associated_filenames: String,
    pub upload_date: i64,
    pub archive_date: Option<i64>,
    pub destroy_date: Option<i64>,
    pub status: String,
    pub checksum: String,
}

impl TryFrom<AssetRow> for AssetRecord {
    type Error = crate::error::Error;

    fn try_from(row: AssetRow) -> Result<Self> {
        let associated_filenames: Vec<(String, String)> = serde_json::from_str(&row.associated_filenames)
            .or_raise(|| ErrorKind::InvalidData("associated_filenames column was not valid JSON"))?;
        Ok(Self {
            asset_path: row.asset_path,
            version_id: row.version_id,
            branch: row.branch,
            primary_filename: row.primary_filename,
            asset_key: row.asset_key,
            associated_filenames,
            upload_date: OffsetDateTime::from_unix_timestamp(row.upload_date)
                .or_raise(|| ErrorKind::InvalidData("upload_date out of range"))?,
            archive_date: row
                .archive_date
                .map(OffsetDateTime::from_unix_timestamp)
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("archive_date out of range"))?,
            destroy_date: row
                .destroy_date
                .map(OffsetDateTime::from_unix_timestamp)
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("destroy_date out of range"))?,
            status: AssetStatus::parse(&row.status)?,
            checksum: row.checksum,
        })
    }
}

/// Outcome of [`crate::MetadataStore::is_primary_changed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeStatus {
    pub changed: bool,
    pub message: String,
}

/// A `users` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub branch: String,
    pub permissions: Vec<String>,
    pub created_at: OffsetDateTime,
}

impl UserRecord {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == "admin" || p == permission)
    }

    pub fn is_admin(&self) -> bool {
        self.permissions.iter().any(|p| p == "admin")
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct UserRow {
    pub username: String,
    pub password_hash: String,
    pub branch: String,
    pub permissions: String,
    pub created_at: i64,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = crate::error::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        let permissions: Vec<String> =
            serde_json::from_str(&row.permissions).or_raise(|| ErrorKind::InvalidData("permissions column was not valid JSON"))?;
        Ok(Self {
            username: row.username,
            password_hash: row.password_hash,
            branch: row.branch,
            permissions,
            created_at: OffsetDateTime::from_unix_timestamp(row.created_at)
                .or_raise(|| ErrorKind::InvalidData("created_at out of range"))?,
        })
    }
}

/// A summary row produced by [`crate::MetadataStore::list_versions_by_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSummary {
    pub asset_path: String,
    pub version_id: String,
    pub primary_filename: String,
    pub last_modified: OffsetDateTime,
}

/// An `audit_log` row.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub username: String,
    pub asset_path: String,
    pub version_id: String,
    pub branch: String,
    pub operation: String,
    pub timestamp: OffsetDateTime,
    pub success: bool,
    pub details: Option<String>,
}
