//! The metadata store: `commit_history`, `users`, and `audit_log`.
//!
//! `commit_history` is the source of truth for every asset's lifecycle state;
//! the object store and vector mirror are kept eventually consistent with it
//! (see the coordinator crate), never the other way around.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{AssetRecord, AssetRow, AuditEvent, ChangeStatus, UserRecord, UserRow, VersionSummary};
use exn::ResultExt;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::instrument;

const ASSET_COLUMNS: &str = "asset_path, version_id, branch, primary_filename, asset_key, \
     associated_filenames, upload_date, archive_date, destroy_date, status, checksum";

/// Repository over the metadata store's three tables.
///
/// When `dry_run` is enabled, write operations validate their inputs but
/// skip the actual mutation, mirroring [`crate::Database`]'s sibling crate's
/// convention for exercising call sites without touching persisted state.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
    dry_run: bool,
}

impl From<&Database> for MetadataStore {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone(), dry_run: false }
    }
}

impl MetadataStore {
    pub fn new(pool: SqlitePool, dry_run: bool) -> Self {
        Self { pool, dry_run }
    }

    fn unix(ts: OffsetDateTime) -> i64 {
        ts.unix_timestamp()
    }

    /* ====================== *\
    |  commit_history methods  |
    \* ====================== */

    /// Upsert by `(asset_path, version_id, branch)`.
    #[instrument(skip(self, record), fields(asset_path = %record.asset_path, branch = %record.branch))]
    pub async fn save_metadata(&self, record: &AssetRecord) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let associated_json = record.associated_filenames_json()?;
        sqlx::query(
            r#"
            INSERT INTO commit_history (
                asset_path, version_id, branch, primary_filename, asset_key,
                associated_filenames, upload_date, archive_date, destroy_date, status, checksum
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (asset_path, version_id, branch) DO UPDATE SET
                primary_filename = excluded.primary_filename,
                asset_key = excluded.asset_key,
                associated_filenames = excluded.associated_filenames,
                upload_date = excluded.upload_date,
                archive_date = excluded.archive_date,
                destroy_date = excluded.destroy_date,
                status = excluded.status,
                checksum = excluded.checksum
            "#,
        )
        .bind(&record.asset_path)
        .bind(&record.version_id)
        .bind(&record.branch)
        .bind(&record.primary_filename)
        .bind(&record.asset_key)
        .bind(associated_json)
        .bind(Self::unix(record.upload_date))
        .bind(record.archive_date.map(Self::unix))
        .bind(record.destroy_date.map(Self::unix))
        .bind(record.status.as_str())
        .bind(&record.checksum)
        .execute(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// The latest `active` row for `asset_path` on `branch`, if any.
    #[instrument(skip(self))]
    pub async fn get_latest_active(&self, asset_path: &str, branch: &str) -> Result<Option<AssetRecord>> {
        let row: Option<AssetRow> = sqlx::query_as(&format!(
            "SELECT {ASSET_COLUMNS} FROM commit_history \
             WHERE asset_path = ? AND status = 'active' AND branch = ? \
             ORDER BY upload_date DESC LIMIT 1"
        ))
        .bind(asset_path)
        .bind(branch)
        .fetch_optional(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        row.map(AssetRecord::try_from).transpose()
    }

    /// The row at an exact `(asset_path, version_id, branch)`.
    #[instrument(skip(self))]
    pub async fn get_by_path_version(&self, asset_path: &str, version_id: &str, branch: &str) -> Result<Option<AssetRecord>> {
        let row: Option<AssetRow> = sqlx::query_as(&format!(
            "SELECT {ASSET_COLUMNS} FROM commit_history WHERE asset_path = ? AND version_id = ? AND branch = ?"
        ))
        .bind(asset_path)
        .bind(version_id)
        .bind(branch)
        .fetch_optional(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        row.map(AssetRecord::try_from).transpose()
    }

    /// Every active version of `asset_key`, newest first.
    #[instrument(skip(self))]
    pub async fn list_versions_by_key(&self, asset_key: &str, branch: &str) -> Result<Vec<VersionSummary>> {
        let rows: Vec<(String, String, String, i64)> = sqlx::query_as(
            "SELECT asset_path, version_id, primary_filename, upload_date FROM commit_history \
             WHERE asset_key = ? AND branch = ? AND status = 'active' ORDER BY upload_date DESC",
        )
        .bind(asset_key)
        .bind(branch)
        .fetch_all(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        rows.into_iter()
            .map(|(asset_path, version_id, primary_filename, upload_date)| {
                Ok(VersionSummary {
                    asset_path,
                    version_id,
                    primary_filename,
                    last_modified: OffsetDateTime::from_unix_timestamp(upload_date)
                        .or_raise(|| ErrorKind::InvalidData("upload_date out of range"))?,
                })
            })
            .collect()
    }

    /// Update `status` for an exact `(asset_path, version_id, branch)`.
    ///
    /// Every caller in this workspace always holds a branch, so there is no
    /// branch-less variant of this update; see `DESIGN.md` for the rationale.
    #[instrument(skip(self))]
    pub async fn update_status(&self, asset_path: &str, version_id: &str, branch: &str, status: crate::models::AssetStatus) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        sqlx::query("UPDATE commit_history SET status = ? WHERE asset_path = ? AND version_id = ? AND branch = ?")
            .bind(status.as_str())
            .bind(asset_path)
            .bind(version_id)
            .bind(branch)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Remove the row and its audit trail.
    #[instrument(skip(self))]
    pub async fn delete_metadata(&self, asset_path: &str, version_id: &str, branch: &str) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query("DELETE FROM commit_history WHERE asset_path = ? AND version_id = ? AND branch = ?")
            .bind(asset_path)
            .bind(version_id)
            .bind(branch)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query("DELETE FROM audit_log WHERE asset_path = ? AND version_id = ? AND branch = ?")
            .bind(asset_path)
            .bind(version_id)
            .bind(branch)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Most-recently uploaded row for `asset_path`, regardless of status.
    #[instrument(skip(self))]
    pub async fn get_head_version(&self, asset_path: &str, branch: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT version_id FROM commit_history WHERE asset_path = ? AND branch = ? ORDER BY upload_date DESC LIMIT 1",
        )
        .bind(asset_path)
        .bind(branch)
        .fetch_optional(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        Ok(row.map(|(version_id,)| version_id))
    }

    /// Determine whether `checksum` has been seen for an active row already,
    /// and if so, where.
    #[instrument(skip(self))]
    pub async fn is_primary_changed(&self, checksum: &str, asset_path: &str, branch: &str) -> Result<ChangeStatus> {
        let row: Option<AssetRow> = sqlx::query_as(&format!(
            "SELECT {ASSET_COLUMNS} FROM commit_history WHERE checksum = ? AND branch = ? AND status = 'active' LIMIT 1"
        ))
        .bind(checksum)
        .bind(branch)
        .fetch_optional(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        let Some(row) = row else {
            return Ok(ChangeStatus { changed: true, message: "The primary file is a new file".to_string() });
        };
        if row.asset_path == asset_path {
            Ok(ChangeStatus {
                changed: false,
                message: format!(
                    "The same primary file already exists in the database with the asset path: {} and version ID: {}",
                    row.asset_path, row.version_id
                ),
            })
        } else {
            Ok(ChangeStatus {
                changed: false,
                message: format!(
                    "The same primary file already exists in the database with a different file name {} and asset path: {} and version ID: {}",
                    row.primary_filename, row.asset_path, row.version_id
                ),
            })
        }
    }

    /// Active rows whose `archive_date` has passed.
    #[instrument(skip(self))]
    pub async fn assets_to_archive(&self, before: OffsetDateTime) -> Result<Vec<AssetRecord>> {
        let rows: Vec<AssetRow> = sqlx::query_as(&format!(
            "SELECT {ASSET_COLUMNS} FROM commit_history WHERE status = 'active' AND archive_date <= ?"
        ))
        .bind(Self::unix(before))
        .fetch_all(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(AssetRecord::try_from).collect()
    }

    /// Archived rows whose `destroy_date` has passed.
    #[instrument(skip(self))]
    pub async fn assets_to_destroy(&self, before: OffsetDateTime) -> Result<Vec<AssetRecord>> {
        let rows: Vec<AssetRow> = sqlx::query_as(&format!(
            "SELECT {ASSET_COLUMNS} FROM commit_history WHERE status = 'archived' AND destroy_date <= ?"
        ))
        .bind(Self::unix(before))
        .fetch_all(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(AssetRecord::try_from).collect()
    }

    /* ================ *\
    |  audit_log methods  |
    \* ================ */

    /// Append one row to the audit trail.
    #[instrument(skip(self, event), fields(operation = %event.operation, success = event.success))]
    pub async fn audit_log(&self, event: &AuditEvent) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO audit_log (username, asset_path, version_id, branch, operation, timestamp, success, details) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.username)
        .bind(&event.asset_path)
        .bind(&event.version_id)
        .bind(&event.branch)
        .bind(&event.operation)
        .bind(Self::unix(event.timestamp))
        .bind(event.success)
        .bind(&event.details)
        .execute(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Delete audit rows older than `before`, in batches, looping until a
    /// batch deletes nothing. Returns the total number of rows removed.
    #[instrument(skip(self))]
    pub async fn cleanup_logs(&self, before: OffsetDateTime, batch_size: i64) -> Result<u64> {
        if self.dry_run {
            return Ok(0);
        }
        let cutoff = Self::unix(before);
        let mut total = 0u64;
        loop {
            let result = sqlx::query(
                "DELETE FROM audit_log WHERE id IN (SELECT id FROM audit_log WHERE timestamp < ? LIMIT ?)",
            )
            .bind(cutoff)
            .bind(batch_size)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
            let deleted = result.rows_affected();
            total += deleted;
            if deleted == 0 {
                break;
            }
        }
        Ok(total)
    }

    /* ============== *\
    |  users methods   |
    \* ============== */

    #[instrument(skip(self))]
    pub async fn get_user_by_name(&self, username: &str) -> Result<Option<UserRecord>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT username, password_hash, branch, permissions, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        row.map(UserRecord::try_from).transpose()
    }

    /// Insert a new user row. Fails with [`ErrorKind::DuplicateUser`] if the
    /// username is already taken.
    #[instrument(skip(self, password_hash, permissions))]
    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        branch: &str,
        permissions: &[String],
        created_at: OffsetDateTime,
    ) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        if self.get_user_by_name(username).await?.is_some() {
            exn::bail!(ErrorKind::DuplicateUser(username.to_string()));
        }
        let permissions_json =
            serde_json::to_string(permissions).or_raise(|| ErrorKind::InvalidData("permissions did not serialize"))?;
        sqlx::query("INSERT INTO users (username, password_hash, branch, permissions, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(username)
            .bind(password_hash)
            .bind(branch)
            .bind(permissions_json)
            .bind(Self::unix(created_at))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_user_by_name(&self, username: &str) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        sqlx::query("DELETE FROM users WHERE username = ?")
            .bind(username)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    #[instrument(skip(self, permissions))]
    pub async fn change_user_permissions(&self, username: &str, permissions: &[String]) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let permissions_json =
            serde_json::to_string(permissions).or_raise(|| ErrorKind::InvalidData("permissions did not serialize"))?;
        sqlx::query("UPDATE users SET permissions = ? WHERE username = ?")
            .bind(permissions_json)
            .bind(username)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use time::macros::datetime;

    async fn store() -> MetadataStore {
        let db = Database::connect_in_memory().await.expect("in-memory db");
        MetadataStore::from(&db)
    }

    fn record(asset_path: &str, version_id: &str, branch: &str, checksum: &str, status: crate::models::AssetStatus) -> AssetRecord {
        AssetRecord {
            asset_path: asset_path.to_string(),
            version_id: version_id.to_string(),
            branch: branch.to_string(),
            primary_filename: "greeting.txt".to_string(),
            asset_key: format!("{asset_path}/greeting.txt"),
            associated_filenames: Vec::new(),
            upload_date: datetime!(2024-01-01 00:00:00 UTC),
            archive_date: Some(datetime!(2024-01-31 00:00:00 UTC)),
            destroy_date: Some(datetime!(2024-03-01 00:00:00 UTC)),
            status,
            checksum: checksum.to_string(),
        }
    }

    #[tokio::test]
    async fn save_and_fetch_round_trips() {
        let store = store().await;
        let rec = record("document/greeting", "v1", "alice_space", "abc123", crate::models::AssetStatus::Active);
        store.save_metadata(&rec).await.expect("save");

        let fetched = store.get_by_path_version("document/greeting", "v1", "alice_space").await.expect("get").expect("present");
        assert_eq!(fetched, rec);

        let latest = store.get_latest_active("document/greeting", "alice_space").await.expect("latest").expect("present");
        assert_eq!(latest.version_id, "v1");
    }

    #[tokio::test]
    async fn save_metadata_upserts_on_conflict() {
        let store = store().await;
        let mut rec = record("document/greeting", "v1", "alice_space", "abc123", crate::models::AssetStatus::Active);
        store.save_metadata(&rec).await.expect("save");

        rec.status = crate::models::AssetStatus::Archived;
        store.save_metadata(&rec).await.expect("re-save");

        let fetched = store.get_by_path_version("document/greeting", "v1", "alice_space").await.expect("get").expect("present");
        assert_eq!(fetched.status, crate::models::AssetStatus::Archived);
    }

    #[tokio::test]
    async fn get_latest_active_ignores_archived_rows() {
        let store = store().await;
        let archived = record("document/greeting", "v1", "alice_space", "abc123", crate::models::AssetStatus::Archived);
        store.save_metadata(&archived).await.expect("save");

        let latest = store.get_latest_active("document/greeting", "alice_space").await.expect("query");
        assert!(latest.is_none());
    }

    #[tokio::test]
    async fn is_primary_changed_reports_new_file_when_unseen() {
        let store = store().await;
        let status = store.is_primary_changed("nonexistent-checksum", "document/greeting", "alice_space").await.expect("query");
        assert!(status.changed);
    }

    #[tokio::test]
    async fn is_primary_changed_names_the_same_asset_path() {
        let store = store().await;
        let rec = record("document/greeting", "v1", "alice_space", "abc123", crate::models::AssetStatus::Active);
        store.save_metadata(&rec).await.expect("save");

        let status = store.is_primary_changed("abc123", "document/greeting", "alice_space").await.expect("query");
        assert!(!status.changed);
        assert!(status.message.contains("document/greeting"));
    }

    #[tokio::test]
    async fn is_primary_changed_names_a_different_asset_path() {
        let store = store().await;
        let rec = record("document/greeting", "v1", "alice_space", "abc123", crate::models::AssetStatus::Active);
        store.save_metadata(&rec).await.expect("save");

        let status = store.is_primary_changed("abc123", "document/hi", "alice_space").await.expect("query");
        assert!(!status.changed);
        assert!(status.message.contains("document/greeting"));
    }

    #[tokio::test]
    async fn assets_to_archive_and_destroy_select_by_status_and_due_date() {
        let store = store().await;
        let active = record("document/a", "v1", "alice_space", "a1", crate::models::AssetStatus::Active);
        let archived = record("document/b", "v1", "alice_space", "b1", crate::models::AssetStatus::Archived);
        store.save_metadata(&active).await.expect("save a");
        store.save_metadata(&archived).await.expect("save b");

        let due_to_archive = store.assets_to_archive(datetime!(2024-02-01 00:00:00 UTC)).await.expect("query");
        assert_eq!(due_to_archive.len(), 1);
        assert_eq!(due_to_archive[0].asset_path, "document/a");

        let due_to_destroy = store.assets_to_destroy(datetime!(2024-04-01 00:00:00 UTC)).await.expect("query");
        assert_eq!(due_to_destroy.len(), 1);
        assert_eq!(due_to_destroy[0].asset_path, "document/b");
    }

    #[tokio::test]
    async fn update_status_then_delete_metadata_removes_row_and_audit_trail() {
        let store = store().await;
        let rec = record("document/greeting", "v1", "alice_space", "abc123", crate::models::AssetStatus::Active);
        store.save_metadata(&rec).await.expect("save");
        store
            .audit_log(&AuditEvent {
                username: "alice".to_string(),
                asset_path: "document/greeting".to_string(),
                version_id: "v1".to_string(),
                branch: "alice_space".to_string(),
                operation: "upload".to_string(),
                timestamp: datetime!(2024-01-01 00:00:00 UTC),
                success: true,
                details: None,
            })
            .await
            .expect("audit");

        store.update_status("document/greeting", "v1", "alice_space", crate::models::AssetStatus::Archived).await.expect("update");
        let archived = store.get_by_path_version("document/greeting", "v1", "alice_space").await.expect("get").expect("present");
        assert_eq!(archived.status, crate::models::AssetStatus::Archived);

        store.delete_metadata("document/greeting", "v1", "alice_space").await.expect("delete");
        assert!(store.get_by_path_version("document/greeting", "v1", "alice_space").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn get_head_version_is_the_most_recently_uploaded_row() {
        let store = store().await;
        let mut v1 = record("document/greeting", "v1", "alice_space", "a1", crate::models::AssetStatus::Active);
        v1.upload_date = datetime!(2024-01-01 00:00:00 UTC);
        let mut v2 = record("document/greeting", "v2", "alice_space", "a2", crate::models::AssetStatus::Active);
        v2.upload_date = datetime!(2024-02-01 00:00:00 UTC);
        store.save_metadata(&v1).await.expect("save v1");
        store.save_metadata(&v2).await.expect("save v2");

        let head = store.get_head_version("document/greeting", "alice_space").await.expect("head");
        assert_eq!(head.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn cleanup_logs_batches_until_dry() {
        let store = store().await;
        for i in 0..5 {
            store
                .audit_log(&AuditEvent {
                    username: "alice".to_string(),
                    asset_path: "document/greeting".to_string(),
                    version_id: format!("v{i}"),
                    branch: "alice_space".to_string(),
                    operation: "upload".to_string(),
                    timestamp: datetime!(2023-01-01 00:00:00 UTC),
                    success: true,
                    details: None,
                })
                .await
                .expect("audit");
        }
        let deleted = store.cleanup_logs(datetime!(2024-01-01 00:00:00 UTC), 2).await.expect("cleanup");
        assert_eq!(deleted, 5);
    }

    #[tokio::test]
    async fn create_user_rejects_duplicate_usernames() {
        let store = store().await;
        store.create_user("alice", "hash", "alice_space", &["admin".to_string()], datetime!(2024-01-01 00:00:00 UTC)).await.expect("create");

        let result =
            store.create_user("alice", "other-hash", "other_space", &["admin".to_string()], datetime!(2024-01-01 00:00:00 UTC)).await;
        assert!(matches!(&*result.unwrap_err(), ErrorKind::DuplicateUser(_)));
    }

    #[tokio::test]
    async fn change_user_permissions_and_delete_user() {
        let store = store().await;
        store.create_user("alice", "hash", "alice_space", &["upload".to_string()], datetime!(2024-01-01 00:00:00 UTC)).await.expect("create");

        store.change_user_permissions("alice", &["upload".to_string(), "download".to_string()]).await.expect("change");
        let user = store.get_user_by_name("alice").await.expect("get").expect("present");
        assert!(user.has_permission("download"));
        assert!(!user.is_admin());

        store.delete_user_by_name("alice").await.expect("delete");
        assert!(store.get_user_by_name("alice").await.expect("get").is_none());
    }
}
