//! Typed request/response shapes for the operations in [`crate::lifecycle`].
//!
//! These are the thin adapter shapes an HTTP listener would bind to:
//! internal fields (`branch`, `checksum`) never leave this boundary.

use ledger_metadata::{AssetRecord, AssetStatus, ChangeStatus, UserRecord};
use time::OffsetDateTime;

/// One file to upload: its raw bytes and the client-supplied filename.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Lifecycle-relevant fields of a persisted asset version, with `branch`
/// and `checksum` stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetVersionResponse {
    pub asset_path: String,
    pub version_id: String,
    pub primary_filename: String,
    pub asset_key: String,
    pub associated_filenames: Vec<(String, String)>,
    pub upload_date: OffsetDateTime,
    pub archive_date: Option<OffsetDateTime>,
    pub destroy_date: Option<OffsetDateTime>,
    pub status: AssetStatus,
    /// Result of the primary-checksum uniqueness check. Only `upload`
    /// populates this with a real value; every other operation leaves it at
    /// its default (`changed: false, message: ""`).
    pub change_status: ChangeStatus,
}

impl From<&AssetRecord> for AssetVersionResponse {
    fn from(record: &AssetRecord) -> Self {
        Self {
            asset_path: record.asset_path.clone(),
            version_id: record.version_id.clone(),
            primary_filename: record.primary_filename.clone(),
            asset_key: record.asset_key.clone(),
            associated_filenames: record.associated_filenames.clone(),
            upload_date: record.upload_date,
            archive_date: record.archive_date,
            destroy_date: record.destroy_date,
            status: record.status,
            change_status: ChangeStatus { changed: false, message: String::new() },
        }
    }
}

/// One readable file, as returned by [`crate::lifecycle::LifecycleCoordinator::retrieve`].
#[derive(Debug, Clone)]
pub struct RetrievedFile {
    pub filename: String,
    pub content_type: String,
    pub version_id: String,
    pub url: String,
    pub content: Option<Vec<u8>>,
}

/// Full result of a `retrieve` call: the metadata plus the primary file and
/// whichever associated files were fetched successfully.
#[derive(Debug, Clone)]
pub struct RetrieveResult {
    pub metadata: AssetVersionResponse,
    pub primary_file: RetrievedFile,
    pub associated_files: Vec<RetrievedFile>,
}

/// One entry in a `list_versions` response.
#[derive(Debug, Clone)]
pub struct VersionListEntry {
    pub key: String,
    pub version_id: String,
    pub last_modified: OffsetDateTime,
    pub url: String,
}

/// A provisioned tenant or shared user, with the password hash stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserResponse {
    pub username: String,
    pub branch: String,
    pub permissions: Vec<String>,
}

impl From<&UserRecord> for UserResponse {
    fn from(user: &UserRecord) -> Self {
        Self { username: user.username.clone(), branch: user.branch.clone(), permissions: user.permissions.clone() }
    }
}
