//! `LifecycleCoordinator`: the six asset operations, wired across the
//! object store, metadata store, and vector mirror.
//!
//! Every operation starts with [`crate::permissions::check`]. The three
//! backing stores are kept eventually consistent in priority order —
//! metadata store first, object store second, vector mirror last and
//! always best-effort. Only `archive`/`destroy` touch the vector mirror
//! live; `upload`/`add_associated_files` leave it to the reconciler.

use crate::dto::{AssetVersionResponse, RetrieveResult, RetrievedFile, UploadFile, UserResponse, VersionListEntry};
use crate::error::{ErrorKind, Result};
use crate::permissions;
use exn::ResultExt;
use ledger_metadata::{AssetRecord, AssetStatus, AuditEvent, MetadataStore, UserRecord};
use ledger_storage::{ObjectStore as _, StoreHandle, UploadOutcome};
use ledger_vectorindex::{MirrorHandle, VectorMirror as _};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{instrument, warn};

/// How many times [`LifecycleCoordinator::archive`] polls for read-after-write
/// visibility before giving up and returning the record anyway.
///
/// Deliberately bounded rather than unbounded (see `DESIGN.md`): an
/// eventually consistent store that never converges should not wedge the
/// request.
const ARCHIVE_POLL_MAX_ATTEMPTS: u32 = 20;
const ARCHIVE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Default number of days before an active asset is archived, absent an
/// explicit `archive_ttl_days`.
pub const DEFAULT_ARCHIVE_TTL_DAYS: i64 = 30;
/// Default number of days after archiving before an asset is destroyed.
pub const DEFAULT_DESTROY_TTL_DAYS: i64 = 30;

/// Orchestrates C3 (object store), C4 (metadata store), and C5 (vector
/// mirror) into the six lifecycle operations.
#[derive(Clone)]
pub struct LifecycleCoordinator {
    metadata: MetadataStore,
    object_store: StoreHandle,
    vector_mirror: MirrorHandle,
    upload_concurrency: usize,
    repository_id: String,
    default_branch: String,
}

impl LifecycleCoordinator {
    pub fn new(
        metadata: MetadataStore,
        object_store: StoreHandle,
        vector_mirror: MirrorHandle,
        upload_concurrency: usize,
        repository_id: String,
        default_branch: String,
    ) -> Self {
        Self { metadata, object_store, vector_mirror, upload_concurrency, repository_id, default_branch }
    }

    async fn require_user(&self, username: &str) -> Result<UserRecord> {
        self.metadata
            .get_user_by_name(username)
            .await
            .or_raise(|| ErrorKind::Internal("looking up user".to_string()))?
            .ok_or_else(|| ErrorKind::Forbidden(format!("user {username} not found")).into())
    }

    /// Uploads a new primary file (and any associated sidecars), creating or
    /// updating the asset version.
    #[instrument(skip(self, primary, associated), fields(username, branch))]
    pub async fn upload(
        &self,
        username: &str,
        branch: &str,
        primary: UploadFile,
        associated: Vec<UploadFile>,
        archive_ttl_days: Option<i64>,
        destroy_ttl_days: Option<i64>,
    ) -> Result<AssetVersionResponse> {
        let user = self.require_user(username).await?;
        permissions::check(&user, branch, "upload")?;

        let primary_filename = ledger_storage::sanitize_filename(&primary.name)
            .or_raise(|| ErrorKind::InvalidInput(format!("invalid primary filename `{}`", primary.name)))?;
        let file_type = ledger_storage::classify(&primary_filename, primary.bytes.get(..16));
        let base_path = file_type.media_class.base_path();
        let asset_path = format!("{base_path}/{}", ledger_storage::stem(&primary_filename));
        let primary_key = format!("{asset_path}/{primary_filename}");

        let archive_ttl_days = archive_ttl_days.unwrap_or(DEFAULT_ARCHIVE_TTL_DAYS);
        let destroy_ttl_days = destroy_ttl_days.unwrap_or(DEFAULT_DESTROY_TTL_DAYS);
        let upload_date = OffsetDateTime::now_utc();
        let archive_date = upload_date + time::Duration::days(archive_ttl_days);
        let destroy_date = archive_date + time::Duration::days(destroy_ttl_days);

        let lifecycle_metadata = lifecycle_user_metadata(upload_date, archive_date, destroy_date);
        let outcome = self
            .object_store
            .upload(branch, &primary_key, primary.bytes, &file_type.mime_type, lifecycle_metadata.clone())
            .await
            .or_raise(|| ErrorKind::StorageError(format!("uploading primary file {primary_key}")))?;

        let (version_id, checksum, prior): (String, String, Option<AssetRecord>) = match outcome {
            UploadOutcome::Committed { version_id, checksum } => {
                self.object_store
                    .delete_associated(branch, &asset_path, &primary_filename)
                    .await
                    .or_raise(|| ErrorKind::StorageError(format!("purging stale sidecars under {asset_path}")))?;
                (version_id, checksum, None)
            },
            UploadOutcome::NoChange => {
                let prior = self
                    .metadata
                    .get_latest_active(&asset_path, branch)
                    .await
                    .or_raise(|| ErrorKind::Internal("fetching prior active record".to_string()))?
                    .ok_or_else(|| ErrorKind::Internal(format!("no-change upload with no prior record at {asset_path}")))?;
                let version_id = prior.version_id.clone();
                let checksum = prior.checksum.clone();
                (version_id, checksum, Some(prior))
            },
        };

        let new_pairs = self.upload_associated(branch, &asset_path, associated, upload_date, archive_date, destroy_date, prior.as_ref()).await;

        let associated_filenames = match &prior {
            Some(prior) => merge_associated(&prior.associated_filenames, new_pairs),
            None => new_pairs,
        };

        let change_status = self
            .metadata
            .is_primary_changed(&checksum, &asset_path, branch)
            .await
            .or_raise(|| ErrorKind::Internal("checking primary checksum uniqueness".to_string()))?;

        let record = AssetRecord {
            asset_path: asset_path.clone(),
            version_id: version_id.clone(),
            branch: branch.to_string(),
            primary_filename: prior.as_ref().map(|p| p.primary_filename.clone()).unwrap_or(primary_filename),
            // overwritten below by `fix_asset_key` once `primary_filename` above is settled
            asset_key: String::new(),
            associated_filenames,
            upload_date: prior.as_ref().map(|p| p.upload_date).unwrap_or(upload_date),
            archive_date: Some(prior.as_ref().and_then(|p| p.archive_date).unwrap_or(archive_date)),
            destroy_date: Some(prior.as_ref().and_then(|p| p.destroy_date).unwrap_or(destroy_date)),
            status: AssetStatus::Active,
            checksum,
        };
        let record = fix_asset_key(record);

        self.metadata.save_metadata(&record).await.or_raise(|| ErrorKind::Internal("saving asset metadata".to_string()))?;

        self.audit(username, &asset_path, &version_id, branch, "upload", true, Some(change_status.message.clone())).await;

        let mut response = AssetVersionResponse::from(&record);
        response.change_status = change_status;
        Ok(response)
    }

    async fn upload_associated(
        &self,
        branch: &str,
        asset_path: &str,
        files: Vec<UploadFile>,
        upload_date: OffsetDateTime,
        archive_date: OffsetDateTime,
        destroy_date: OffsetDateTime,
        prior: Option<&AssetRecord>,
    ) -> Vec<(String, String)> {
        let object_store = self.object_store.clone();
        let asset_path = asset_path.to_string();
        let branch = branch.to_string();
        let lifecycle_metadata = lifecycle_user_metadata(upload_date, archive_date, destroy_date);
        let outcomes = ledger_asyncutils::fan_out_lenient(files, self.upload_concurrency, "upload associated files", move |file| {
            let object_store = object_store.clone();
            let asset_path = asset_path.clone();
            let branch = branch.clone();
            let lifecycle_metadata = lifecycle_metadata.clone();
            async move {
                let filename = ledger_storage::sanitize_filename(&file.name)
                    .or_raise(|| ErrorKind::InvalidInput(format!("invalid associated filename `{}`", file.name)))?;
                let file_type = ledger_storage::classify(&filename, file.bytes.get(..16));
                let key = format!("{asset_path}/{filename}");
                let outcome = object_store
                    .upload(&branch, &key, file.bytes, &file_type.mime_type, lifecycle_metadata)
                    .await
                    .or_raise(|| ErrorKind::StorageError(format!("uploading associated file {key}")))?;
                Ok::<_, crate::error::Error>((filename, outcome))
            }
        })
        .await;

        outcomes
            .into_iter()
            .map(|(filename, outcome)| match outcome {
                UploadOutcome::Committed { version_id, .. } => (filename, version_id),
                UploadOutcome::NoChange => {
                    let reused = prior.and_then(|p| p.associated_filenames.iter().find(|(n, _)| *n == filename).map(|(_, v)| v.clone()));
                    (filename, reused.unwrap_or_else(|| prior.map(|p| p.version_id.clone()).unwrap_or_default()))
                },
            })
            .collect()
    }

    /// Adds associated files to an already-uploaded, still-active asset
    /// version.
    #[instrument(skip(self, files), fields(username, branch, asset_path))]
    pub async fn add_associated_files(
        &self,
        username: &str,
        branch: &str,
        asset_path: &str,
        files: Vec<UploadFile>,
        target_version_id: Option<String>,
    ) -> Result<AssetVersionResponse> {
        let user = self.require_user(username).await?;
        permissions::check(&user, branch, "upload")?;

        if files.is_empty() {
            return Err(ErrorKind::InvalidInput("no associated files provided".to_string()).into());
        }
        let asset_path = ledger_storage::validate_path(asset_path)
            .or_raise(|| ErrorKind::InvalidInput(format!("invalid asset path `{asset_path}`")))?
            .to_string_lossy()
            .into_owned();

        let target = match &target_version_id {
            Some(version_id) => self
                .metadata
                .get_by_path_version(&asset_path, version_id, branch)
                .await
                .or_raise(|| ErrorKind::Internal("fetching target version".to_string()))?
                .ok_or_else(|| ErrorKind::NotFound(format!("asset not found for {asset_path}/{version_id}")))?,
            None => self
                .metadata
                .get_latest_active(&asset_path, branch)
                .await
                .or_raise(|| ErrorKind::Internal("fetching latest active version".to_string()))?
                .ok_or_else(|| ErrorKind::NotFound(format!("no active asset found for path {asset_path}")))?,
        };
        if target.status != AssetStatus::Active {
            return Err(ErrorKind::PreconditionFailed(format!(
                "target asset version is not active (status: {})",
                target.status.as_str()
            ))
            .into());
        }

        let object_store = self.object_store.clone();
        let branch_owned = branch.to_string();
        let asset_path_for_fanout = asset_path.clone();
        let lifecycle_metadata =
            lifecycle_user_metadata(target.upload_date, target.archive_date.unwrap_or(target.upload_date), target.destroy_date.unwrap_or(target.upload_date));
        let new_pairs = ledger_asyncutils::fan_out_strict(
            files,
            self.upload_concurrency,
            "add associated files",
            move |file| {
                let object_store = object_store.clone();
                let asset_path = asset_path_for_fanout.clone();
                let branch = branch_owned.clone();
                let lifecycle_metadata = lifecycle_metadata.clone();
                async move {
                    let filename = ledger_storage::sanitize_filename(&file.name)
                        .or_raise(|| ErrorKind::InvalidInput(format!("invalid associated filename `{}`", file.name)))?;
                    let file_type = ledger_storage::classify(&filename, file.bytes.get(..16));
                    let key = format!("{asset_path}/{filename}");
                    let outcome = object_store
                        .upload(&branch, &key, file.bytes, &file_type.mime_type, lifecycle_metadata)
                        .await
                        .or_raise(|| ErrorKind::StorageError(format!("uploading associated file {key}")))?;
                    Ok::<_, crate::error::Error>((filename, outcome))
                }
            },
            || ErrorKind::StorageError("all associated file uploads failed".to_string()).into(),
        )
        .await?;

        let resolved: Vec<(String, String)> = new_pairs
            .into_iter()
            .map(|(filename, outcome)| match outcome {
                UploadOutcome::Committed { version_id, .. } => (filename, version_id),
                UploadOutcome::NoChange => {
                    let reused = target.associated_filenames.iter().find(|(n, _)| *n == filename).map(|(_, v)| v.clone());
                    (filename, reused.unwrap_or_else(|| target.version_id.clone()))
                },
            })
            .collect();
        let count = resolved.len();

        let mut record = target;
        record.associated_filenames = merge_associated(&record.associated_filenames, resolved);

        self.metadata.save_metadata(&record).await.or_raise(|| ErrorKind::Internal("saving asset metadata".to_string()))?;

        self.audit(
            username,
            &asset_path,
            &record.version_id,
            branch,
            "add_associated_files",
            true,
            Some(format!("Added {count} associated files")),
        )
        .await;

        Ok(AssetVersionResponse::from(&record))
    }

    /// Fetches a specific asset version, its primary file, and whichever
    /// associated files are reachable.
    #[instrument(skip(self), fields(username, branch, asset_path, version_id))]
    pub async fn retrieve(
        &self,
        username: &str,
        branch: &str,
        asset_path: &str,
        version_id: &str,
        want_content: bool,
    ) -> Result<RetrieveResult> {
        let user = self.require_user(username).await?;
        permissions::check(&user, branch, "download")?;

        let asset_path = ledger_storage::validate_path(asset_path)
            .or_raise(|| ErrorKind::InvalidInput(format!("invalid asset path `{asset_path}`")))?
            .to_string_lossy()
            .into_owned();

        let record = self
            .metadata
            .get_by_path_version(&asset_path, version_id, branch)
            .await
            .or_raise(|| ErrorKind::Internal("fetching asset metadata".to_string()))?;
        let Some(record) = record else {
            self.audit(username, &asset_path, version_id, branch, "retrieve", false, Some("asset not found".to_string())).await;
            return Err(ErrorKind::NotFound(format!("asset with path {asset_path} and version {version_id} not found")).into());
        };

        let primary_file = match self.fetch_file(branch, &asset_path, &record.primary_filename, &record.version_id, want_content).await {
            Ok(file) => file,
            Err(_) => {
                self.audit(username, &asset_path, version_id, branch, "retrieve", false, Some("primary file not found".to_string())).await;
                return Err(ErrorKind::NotFound(format!("primary file {} not found", record.primary_filename)).into());
            },
        };

        let object_store = self.object_store.clone();
        let branch_owned = branch.to_string();
        let asset_path_owned = asset_path.clone();
        let pairs: Vec<(String, String)> = record.associated_filenames.iter().filter(|(name, _)| !name.is_empty()).cloned().collect();
        let associated_files = ledger_asyncutils::fan_out_lenient(pairs, self.upload_concurrency, "retrieve associated files", move |(filename, file_version_id)| {
            let object_store = object_store.clone();
            let branch = branch_owned.clone();
            let asset_path = asset_path_owned.clone();
            async move {
                let content = object_store
                    .read(&branch, &format!("{asset_path}/{filename}"), &file_version_id, want_content)
                    .await
                    .or_raise(|| ErrorKind::StorageError(format!("fetching associated file {filename}")))?;
                Ok::<_, crate::error::Error>(RetrievedFile {
                    filename,
                    content_type: content.content_type,
                    version_id: file_version_id,
                    url: content.url,
                    content: content.content,
                })
            }
        })
        .await;

        self.audit(username, &asset_path, version_id, branch, "retrieve", true, None).await;

        Ok(RetrieveResult { metadata: AssetVersionResponse::from(&record), primary_file, associated_files })
    }

    async fn fetch_file(&self, branch: &str, asset_path: &str, filename: &str, version_id: &str, want_content: bool) -> Result<RetrievedFile> {
        let content = self
            .object_store
            .read(branch, &format!("{asset_path}/{filename}"), version_id, want_content)
            .await
            .or_raise(|| ErrorKind::StorageError(format!("fetching file {filename}")))?;
        Ok(RetrievedFile {
            filename: filename.to_string(),
            content_type: content.content_type,
            version_id: version_id.to_string(),
            url: content.url,
            content: content.content,
        })
    }

    /// Transitions an active asset version to `archived`. See
    /// Idempotent: an already-archived record fails the precondition.
    #[instrument(skip(self), fields(username, branch, asset_path, version_id))]
    pub async fn archive(&self, username: &str, branch: &str, asset_path: &str, version_id: &str) -> Result<AssetVersionResponse> {
        let user = self.require_user(username).await?;
        permissions::check(&user, branch, "archive")?;

        let asset_path = ledger_storage::validate_path(asset_path)
            .or_raise(|| ErrorKind::InvalidInput(format!("invalid asset path `{asset_path}`")))?
            .to_string_lossy()
            .into_owned();

        let record = self
            .metadata
            .get_by_path_version(&asset_path, version_id, branch)
            .await
            .or_raise(|| ErrorKind::Internal("fetching asset metadata".to_string()))?;
        let Some(record) = record else {
            self.audit(username, &asset_path, version_id, branch, "archive", false, Some("asset not found".to_string())).await;
            return Err(ErrorKind::NotFound(format!("asset with path {asset_path} and version {version_id} not found")).into());
        };
        if record.status != AssetStatus::Active {
            let message = format!("asset {asset_path}/{version_id} is already {}", record.status.as_str());
            self.audit(username, &asset_path, version_id, branch, "archive", false, Some(message.clone())).await;
            return Err(ErrorKind::PreconditionFailed(message).into());
        }

        self.metadata
            .update_status(&asset_path, version_id, branch, AssetStatus::Archived)
            .await
            .or_raise(|| ErrorKind::Internal("updating asset status".to_string()))?;

        if let Err(error) = self.vector_mirror.mark_archived(&asset_path, version_id, branch).await {
            warn!(%error, asset_path, version_id, "vector mirror archive failed");
        }

        self.audit(username, &asset_path, version_id, branch, "archive", true, None).await;

        let mut final_record = record;
        for _ in 0..ARCHIVE_POLL_MAX_ATTEMPTS {
            let refreshed = self
                .metadata
                .get_by_path_version(&asset_path, version_id, branch)
                .await
                .or_raise(|| ErrorKind::Internal("polling asset status".to_string()))?;
            if let Some(refreshed) = refreshed {
                let done = refreshed.status == AssetStatus::Archived;
                final_record = refreshed;
                if done {
                    break;
                }
            }
            tokio::time::sleep(ARCHIVE_POLL_INTERVAL).await;
        }

        Ok(AssetVersionResponse::from(&final_record))
    }

    /// Permanently removes an archived asset version.
    #[instrument(skip(self), fields(username, branch, asset_path, version_id))]
    pub async fn destroy(&self, username: &str, branch: &str, asset_path: &str, version_id: &str) -> Result<AssetVersionResponse> {
        let user = self.require_user(username).await?;
        permissions::check(&user, branch, "destroy")?;

        let asset_path = ledger_storage::validate_path(asset_path)
            .or_raise(|| ErrorKind::InvalidInput(format!("invalid asset path `{asset_path}`")))?
            .to_string_lossy()
            .into_owned();

        let record = self
            .metadata
            .get_by_path_version(&asset_path, version_id, branch)
            .await
            .or_raise(|| ErrorKind::Internal("fetching asset metadata".to_string()))?;
        let Some(record) = record else {
            self.audit(username, &asset_path, version_id, branch, "destroy", false, Some("asset not found".to_string())).await;
            return Err(ErrorKind::NotFound(format!("asset with path {asset_path} and version {version_id} not found")).into());
        };
        if record.status != AssetStatus::Archived {
            let message = format!("asset {asset_path}/{version_id} is not archived (status: {})", record.status.as_str());
            self.audit(username, &asset_path, version_id, branch, "destroy", false, Some(message.clone())).await;
            return Err(ErrorKind::PreconditionFailed(message).into());
        }

        let head_version =
            self.metadata.get_head_version(&asset_path, branch).await.or_raise(|| ErrorKind::Internal("fetching head version".to_string()))?;
        if head_version.as_deref() == Some(record.version_id.as_str()) {
            let primary_key = format!("{asset_path}/{}", record.primary_filename);
            if let Err(error) = self.object_store.delete(branch, &primary_key).await {
                warn!(%error, primary_key, "failed to delete primary file");
            }
            for (filename, _) in record.associated_filenames.iter().filter(|(name, _)| !name.is_empty()) {
                let key = format!("{asset_path}/{filename}");
                if let Err(error) = self.object_store.delete(branch, &key).await {
                    warn!(%error, key, "failed to delete associated file");
                }
            }
        } else {
            tracing::info!(asset_path, version_id, "not the head version, skipping object-store deletion");
        }

        self.metadata
            .delete_metadata(&asset_path, version_id, branch)
            .await
            .or_raise(|| ErrorKind::Internal("deleting asset metadata".to_string()))?;

        if let Err(error) = self.vector_mirror.delete(&asset_path, version_id, branch).await {
            warn!(%error, asset_path, version_id, "vector mirror delete failed");
        }

        self.audit(username, &asset_path, version_id, branch, "destroy", true, None).await;

        let mut destroyed = record;
        destroyed.status = AssetStatus::Destroyed;
        Ok(AssetVersionResponse::from(&destroyed))
    }

    /// Lists every active version of a key, each with a presigned URL. See
    /// Each active version gets a freshly generated presigned URL.
    #[instrument(skip(self), fields(username, branch, key))]
    pub async fn list_versions(&self, username: &str, key: &str, branch: &str) -> Result<Vec<VersionListEntry>> {
        let user = self.require_user(username).await?;
        permissions::check(&user, branch, "list")?;

        let key = ledger_storage::validate_path(key).or_raise(|| ErrorKind::InvalidInput(format!("invalid key `{key}`")))?.to_string_lossy().into_owned();
        let base_path = key.rsplit_once('/').map(|(base, _)| base.to_string()).unwrap_or_else(|| key.clone());

        let summaries = self
            .metadata
            .list_versions_by_key(&key, branch)
            .await
            .or_raise(|| ErrorKind::Internal("listing versions by key".to_string()))?;

        let object_store = self.object_store.clone();
        let branch_owned = branch.to_string();
        let key_owned = key.clone();
        let entries = ledger_asyncutils::fan_out_lenient(summaries, self.upload_concurrency, "list versions", move |summary| {
            let object_store = object_store.clone();
            let branch = branch_owned.clone();
            let key = key_owned.clone();
            async move {
                let content = object_store
                    .read(&branch, &format!("{}/{}", summary.asset_path, summary.primary_filename), &summary.version_id, false)
                    .await
                    .or_raise(|| ErrorKind::StorageError(format!("generating presigned url for {key}/{}", summary.version_id)))?;
                Ok::<_, crate::error::Error>(VersionListEntry {
                    key: key.clone(),
                    version_id: summary.version_id,
                    last_modified: summary.last_modified,
                    url: content.url,
                })
            }
        })
        .await;

        self.audit(username, &base_path, "", branch, "list", true, Some(format!("Found {} versions", entries.len()))).await;

        Ok(entries)
    }

    /* ======================== *\
    |  supplemental user mgmt   |
    \* ======================== */

    /// Provisions a new tenant: a dedicated `{username}_space` branch and an
    /// admin account on it. The caller is responsible for hashing
    /// `password_hash` before it reaches this layer; credential hashing is
    /// an external collaborator's concern.
    #[instrument(skip(self, password_hash), fields(username))]
    pub async fn create_tenant(&self, username: &str, password_hash: &str) -> Result<UserResponse> {
        if self.metadata.get_user_by_name(username).await.or_raise(|| ErrorKind::Internal("checking for existing user".to_string()))?.is_some() {
            return Err(ErrorKind::Conflict(format!("username {username} already exists")).into());
        }
        let branch = format!("{username}_space");
        self.object_store
            .ensure_branch(&self.repository_id, &branch, &self.default_branch)
            .await
            .or_raise(|| ErrorKind::StorageError(format!("provisioning branch {branch}")))?;
        self.metadata
            .create_user(username, password_hash, &branch, &["admin".to_string()], OffsetDateTime::now_utc())
            .await
            .or_raise(|| ErrorKind::Internal("creating tenant user".to_string()))?;
        let user = self.require_user(username).await?;
        Ok(UserResponse::from(&user))
    }

    /// Creates a non-admin user scoped to `admin_user`'s branch.
    #[instrument(skip(self, password_hash, permissions), fields(username))]
    pub async fn create_shared_user(
        &self,
        admin_user: &str,
        username: &str,
        password_hash: &str,
        permissions: Vec<String>,
    ) -> Result<UserResponse> {
        let admin = self.require_user(admin_user).await?;
        if !admin.is_admin() {
            return Err(ErrorKind::Forbidden(format!("user {admin_user} is not an admin")).into());
        }
        if permissions.is_empty() || permissions.iter().any(|p| p == "admin") {
            return Err(ErrorKind::InvalidInput("permissions must be non-empty and must not include admin".to_string()).into());
        }
        self.metadata
            .create_user(username, password_hash, &admin.branch, &permissions, OffsetDateTime::now_utc())
            .await
            .or_raise(|| ErrorKind::Internal("creating shared user".to_string()))?;
        let user = self.require_user(username).await?;
        Ok(UserResponse::from(&user))
    }

    /// Removes a non-admin user from `admin_user`'s branch.
    #[instrument(skip(self), fields(username))]
    pub async fn delete_shared_user(&self, admin_user: &str, username: &str) -> Result<()> {
        let admin = self.require_user(admin_user).await?;
        if !admin.is_admin() {
            return Err(ErrorKind::Forbidden(format!("user {admin_user} is not an admin")).into());
        }
        let target = self
            .metadata
            .get_user_by_name(username)
            .await
            .or_raise(|| ErrorKind::Internal("fetching target user".to_string()))?
            .ok_or_else(|| ErrorKind::NotFound(format!("user {username} not found")))?;
        if target.is_admin() {
            return Err(ErrorKind::PreconditionFailed(format!("user {username} is an admin account")).into());
        }
        if target.branch != admin.branch {
            return Err(ErrorKind::Forbidden(format!("user {username} does not belong to branch {}", admin.branch)).into());
        }
        self.metadata.delete_user_by_name(username).await.or_raise(|| ErrorKind::Internal("deleting user".to_string()))?;
        Ok(())
    }

    /// Replaces the permission set of a non-admin user on `admin_user`'s branch.
    #[instrument(skip(self, permissions), fields(username))]
    pub async fn update_shared_user_permissions(&self, admin_user: &str, username: &str, permissions: Vec<String>) -> Result<UserResponse> {
        let admin = self.require_user(admin_user).await?;
        if !admin.is_admin() {
            return Err(ErrorKind::Forbidden(format!("user {admin_user} is not an admin")).into());
        }
        let target = self
            .metadata
            .get_user_by_name(username)
            .await
            .or_raise(|| ErrorKind::Internal("fetching target user".to_string()))?
            .ok_or_else(|| ErrorKind::NotFound(format!("user {username} not found")))?;
        if target.is_admin() {
            return Err(ErrorKind::PreconditionFailed(format!("user {username} is an admin account")).into());
        }
        if target.branch != admin.branch {
            return Err(ErrorKind::Forbidden(format!("user {username} does not belong to branch {}", admin.branch)).into());
        }
        if permissions.is_empty() || permissions.iter().any(|p| p == "admin") {
            return Err(ErrorKind::InvalidInput("permissions must be non-empty and must not include admin".to_string()).into());
        }
        self.metadata
            .change_user_permissions(username, &permissions)
            .await
            .or_raise(|| ErrorKind::Internal("updating user permissions".to_string()))?;
        let user = self.require_user(username).await?;
        Ok(UserResponse::from(&user))
    }

    async fn audit(&self, username: &str, asset_path: &str, version_id: &str, branch: &str, operation: &str, success: bool, details: Option<String>) {
        let event = AuditEvent {
            username: username.to_string(),
            asset_path: asset_path.to_string(),
            version_id: version_id.to_string(),
            branch: branch.to_string(),
            operation: operation.to_string(),
            timestamp: OffsetDateTime::now_utc(),
            success,
            details,
        };
        if let Err(error) = self.metadata.audit_log(&event).await {
            warn!(%error, operation, asset_path, "failed to write audit event");
        }
    }
}

/// Merges `updates` into `base`, preserving each filename's existing
/// position and overwriting its value; new filenames are appended in
/// encounter order (a dictionary-union with "new wins").
fn merge_associated(base: &[(String, String)], updates: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut merged = base.to_vec();
    for (name, version) in updates {
        if name.is_empty() {
            continue;
        }
        match merged.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = version,
            None => merged.push((name, version)),
        }
    }
    merged
}

fn fix_asset_key(mut record: AssetRecord) -> AssetRecord {
    record.asset_key = format!("{}/{}", record.asset_path, record.primary_filename);
    record
}

/// Builds the per-object commit metadata attached to every upload: the
/// three lifecycle timestamps, RFC 3339-formatted.
fn lifecycle_user_metadata(upload_date: OffsetDateTime, archive_date: OffsetDateTime, destroy_date: OffsetDateTime) -> std::collections::HashMap<String, String> {
    use time::format_description::well_known::Rfc3339;
    let mut map = std::collections::HashMap::with_capacity(3);
    if let Ok(s) = upload_date.format(&Rfc3339) {
        map.insert("upload_date".to_string(), s);
    }
    if let Ok(s) = archive_date.format(&Rfc3339) {
        map.insert("archive_date".to_string(), s);
    }
    if let Ok(s) = destroy_date.format(&Rfc3339) {
        map.insert("destroy_date".to_string(), s);
    }
    map
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use ledger_metadata::Database;
    use ledger_storage::MockObjectStore;
    use ledger_vectorindex::MockVectorMirror;
    use std::sync::Arc;

    async fn harness() -> (LifecycleCoordinator, MetadataStore) {
        let db = Database::connect_in_memory().await.expect("in-memory db");
        let metadata = MetadataStore::from(&db);
        metadata
            .create_user("alice", "hash", "alice_space", &["admin".to_string()], OffsetDateTime::now_utc())
            .await
            .expect("create alice");
        metadata
            .create_user("bob", "hash", "bob_space", &["admin".to_string()], OffsetDateTime::now_utc())
            .await
            .expect("create bob");
        let object_store: StoreHandle = Arc::new(MockObjectStore::new());
        let vector_mirror: MirrorHandle = Arc::new(MockVectorMirror::new());
        let coordinator =
            LifecycleCoordinator::new(metadata.clone(), object_store, vector_mirror, 4, "ledger".to_string(), "main".to_string());
        (coordinator, metadata)
    }

    fn file(name: &str, bytes: &[u8]) -> UploadFile {
        UploadFile { name: name.to_string(), bytes: bytes.to_vec() }
    }

    /// Scenario 1: fresh upload of a primary plus one associated file.
    #[tokio::test]
    async fn fresh_upload_creates_active_asset() {
        let (coordinator, _metadata) = harness().await;
        let response = coordinator
            .upload(
                "alice",
                "alice_space",
                file("greeting.txt", b"Hello"),
                vec![file("fr.txt", b"Bonjour")],
                Some(1),
                Some(1),
            )
            .await
            .expect("upload");

        assert_eq!(response.asset_path, "document/greeting");
        assert_eq!(response.status, AssetStatus::Active);
        assert!(response.change_status.changed);
        assert_eq!(response.associated_filenames.len(), 1);
        assert_eq!(response.associated_filenames[0].0, "fr.txt");
    }

    /// Scenario 2: re-uploading byte-identical content resolves to NoChange
    /// and reuses the existing record rather than creating a new one.
    #[tokio::test]
    async fn no_change_replay_reuses_existing_version() {
        let (coordinator, metadata) = harness().await;
        let first = coordinator
            .upload("alice", "alice_space", file("greeting.txt", b"Hello"), vec![], Some(1), Some(1))
            .await
            .expect("first upload");

        let second = coordinator
            .upload("alice", "alice_space", file("greeting.txt", b"Hello"), vec![], Some(1), Some(1))
            .await
            .expect("second upload");

        assert_eq!(second.version_id, first.version_id);
        assert!(!second.change_status.changed);
        assert!(second.change_status.message.contains("document/greeting"));

        let versions = metadata.list_versions_by_key("document/greeting/greeting.txt", "alice_space").await.expect("list");
        assert_eq!(versions.len(), 1);
    }

    /// Re-uploading an identical primary+associated pair resolves both to
    /// NoChange; the associated file's version_id must be reused from the
    /// prior record, not blanked out, or it becomes unretrievable.
    #[tokio::test]
    async fn no_change_replay_preserves_associated_version() {
        let (coordinator, _metadata) = harness().await;
        let first = coordinator
            .upload("alice", "alice_space", file("greeting.txt", b"Hello"), vec![file("fr.txt", b"Bonjour")], Some(1), Some(1))
            .await
            .expect("first upload");
        let first_fr_version = first.associated_filenames.iter().find(|(n, _)| n == "fr.txt").expect("fr.txt present").1.clone();
        assert!(!first_fr_version.is_empty());

        let second = coordinator
            .upload("alice", "alice_space", file("greeting.txt", b"Hello"), vec![file("fr.txt", b"Bonjour")], Some(1), Some(1))
            .await
            .expect("second upload");
        let second_fr_version = second.associated_filenames.iter().find(|(n, _)| n == "fr.txt").expect("fr.txt still present").1.clone();
        assert_eq!(second_fr_version, first_fr_version);

        let retrieved = coordinator
            .retrieve("alice", "alice_space", &second.asset_path, &second.version_id, true)
            .await
            .expect("retrieve after replay");
        assert!(retrieved.associated_files.iter().any(|f| f.filename == "fr.txt"), "fr.txt should still be retrievable");
    }

    /// Scenario 3: the same bytes under a different primary filename is
    /// detected as a cross-path duplicate, but the upload still succeeds.
    #[tokio::test]
    async fn cross_path_dedup_names_the_earlier_asset() {
        let (coordinator, _metadata) = harness().await;
        coordinator.upload("alice", "alice_space", file("greeting.txt", b"Hello"), vec![], Some(1), Some(1)).await.expect("first upload");

        let response = coordinator
            .upload("alice", "alice_space", file("hi.txt", b"Hello"), vec![], Some(1), Some(1))
            .await
            .expect("second upload");

        assert_eq!(response.asset_path, "document/hi");
        assert!(!response.change_status.changed);
        assert!(response.change_status.message.contains("document/greeting"));
    }

    /// Scenario 4: add-associated-files merges into the existing record,
    /// and a second archive call on an already-archived record fails.
    #[tokio::test]
    async fn add_associated_then_archive_then_reject_double_archive() {
        let (coordinator, _metadata) = harness().await;
        let uploaded = coordinator
            .upload("alice", "alice_space", file("greeting.txt", b"Hello"), vec![file("fr.txt", b"Bonjour")], Some(1), Some(1))
            .await
            .expect("upload");

        let updated = coordinator
            .add_associated_files("alice", "alice_space", &uploaded.asset_path, vec![file("es.txt", b"Hola")], None)
            .await
            .expect("add associated");
        assert_eq!(updated.associated_filenames.len(), 2);

        let archived = coordinator.archive("alice", "alice_space", &uploaded.asset_path, &uploaded.version_id).await.expect("archive");
        assert_eq!(archived.status, AssetStatus::Archived);

        let second_archive = coordinator.archive("alice", "alice_space", &uploaded.asset_path, &uploaded.version_id).await;
        assert!(matches!(&*second_archive.unwrap_err(), ErrorKind::PreconditionFailed(_)));
    }

    /// Scenario 5: destroying the head version deletes its blobs and
    /// removes the metadata row and mirror entry.
    #[tokio::test]
    async fn destroy_on_head_removes_metadata_and_mirror() {
        let (coordinator, metadata) = harness().await;
        let uploaded = coordinator
            .upload("alice", "alice_space", file("greeting.txt", b"Hello"), vec![file("fr.txt", b"Bonjour")], Some(1), Some(1))
            .await
            .expect("upload");
        coordinator.archive("alice", "alice_space", &uploaded.asset_path, &uploaded.version_id).await.expect("archive");

        let destroyed =
            coordinator.destroy("alice", "alice_space", &uploaded.asset_path, &uploaded.version_id).await.expect("destroy");
        assert_eq!(destroyed.status, AssetStatus::Destroyed);

        let gone = metadata.get_by_path_version(&uploaded.asset_path, &uploaded.version_id, "alice_space").await.expect("query");
        assert!(gone.is_none());
    }

    /// Destroying a still-active record is rejected (invariant I7).
    #[tokio::test]
    async fn destroy_rejects_active_record() {
        let (coordinator, _metadata) = harness().await;
        let uploaded = coordinator
            .upload("alice", "alice_space", file("greeting.txt", b"Hello"), vec![], Some(1), Some(1))
            .await
            .expect("upload");

        let result = coordinator.destroy("alice", "alice_space", &uploaded.asset_path, &uploaded.version_id).await;
        assert!(matches!(&*result.unwrap_err(), ErrorKind::PreconditionFailed(_)));
    }

    /// Scenario 6: a user from a different branch is denied regardless of
    /// whether the asset exists (invariant I1).
    #[tokio::test]
    async fn cross_branch_access_is_forbidden() {
        let (coordinator, _metadata) = harness().await;
        let uploaded = coordinator
            .upload("alice", "alice_space", file("greeting.txt", b"Hello"), vec![], Some(1), Some(1))
            .await
            .expect("upload");

        let result = coordinator.retrieve("bob", "alice_space", &uploaded.asset_path, &uploaded.version_id, false).await;
        assert!(matches!(&*result.unwrap_err(), ErrorKind::Forbidden(_)));
    }

    /// Same as above, but for an asset path that was never uploaded:
    /// the branch check rejects before the metadata store is even queried.
    #[tokio::test]
    async fn cross_branch_access_is_forbidden_even_for_nonexistent_assets() {
        let (coordinator, _metadata) = harness().await;
        let result = coordinator.retrieve("bob", "alice_space", "document/nonexistent", "v1", false).await;
        assert!(matches!(&*result.unwrap_err(), ErrorKind::Forbidden(_)));
    }

    /// Retrieve round-trips the uploaded primary bytes.
    #[tokio::test]
    async fn retrieve_returns_uploaded_primary_bytes() {
        let (coordinator, _metadata) = harness().await;
        let uploaded = coordinator
            .upload("alice", "alice_space", file("greeting.txt", b"Hello"), vec![], Some(1), Some(1))
            .await
            .expect("upload");

        let retrieved = coordinator
            .retrieve("alice", "alice_space", &uploaded.asset_path, &uploaded.version_id, true)
            .await
            .expect("retrieve");
        assert_eq!(retrieved.primary_file.content.as_deref(), Some(b"Hello".as_slice()));
    }

    /// I5: merging associated files twice keeps each filename's latest
    /// version and preserves any filename that was never re-uploaded.
    #[tokio::test]
    async fn associated_merge_semantics_match_invariant_i5() {
        let (coordinator, _metadata) = harness().await;
        let uploaded = coordinator
            .upload("alice", "alice_space", file("greeting.txt", b"Hello"), vec![file("a.txt", b"one")], Some(1), Some(1))
            .await
            .expect("upload");

        coordinator
            .add_associated_files("alice", "alice_space", &uploaded.asset_path, vec![file("b.txt", b"two")], None)
            .await
            .expect("add b");
        let after_second = coordinator
            .add_associated_files("alice", "alice_space", &uploaded.asset_path, vec![file("a.txt", b"one-updated")], None)
            .await
            .expect("add a again");

        let names: Vec<&str> = after_second.associated_filenames.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a.txt"));
        assert!(names.contains(&"b.txt"));
    }

    #[tokio::test]
    async fn list_versions_returns_presigned_urls() {
        let (coordinator, _metadata) = harness().await;
        let uploaded = coordinator
            .upload("alice", "alice_space", file("greeting.txt", b"Hello"), vec![], Some(1), Some(1))
            .await
            .expect("upload");

        let entries = coordinator.list_versions("alice", &uploaded.asset_key, "alice_space").await.expect("list versions");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version_id, uploaded.version_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_preserves_order_and_overwrites_existing() {
        let base = vec![("a.txt".to_string(), "v1".to_string()), ("b.txt".to_string(), "v1".to_string())];
        let updates = vec![("b.txt".to_string(), "v2".to_string()), ("c.txt".to_string(), "v1".to_string())];
        let merged = merge_associated(&base, updates);
        assert_eq!(
            merged,
            vec![
                ("a.txt".to_string(), "v1".to_string()),
                ("b.txt".to_string(), "v2".to_string()),
                ("c.txt".to_string(), "v1".to_string()),
            ]
        );
    }

    #[test]
    fn merge_skips_empty_filenames() {
        let base = vec![("a.txt".to_string(), "v1".to_string())];
        let updates = vec![(String::new(), "v1".to_string())];
        assert_eq!(merge_associated(&base, updates), base);
    }
}
