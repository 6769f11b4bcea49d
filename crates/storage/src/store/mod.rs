//! The versioned object store contract.
//!
//! Any commit-based, content-addressed object store (a lakeFS-shaped
//! repository/branch/commit model, at minimum) can satisfy this trait.
//! Every mutation is one commit, so a `version_id` maps 1:1 onto a metadata
//! row in the layer above this crate.

mod http;
mod mock;

pub use http::HttpObjectStore;
pub use mock::MockObjectStore;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a primary-file upload attempt.
///
/// A typed sentinel rather than an exception carrying a particular HTTP
/// status and message string, so callers match on it directly instead of
/// string-sniffing an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// A new commit was created.
    Committed { version_id: String, checksum: String },
    /// The attempted write was byte-identical to the current head; no
    /// commit was made.
    NoChange,
}

/// A readable object: its bytes (if requested), content type, and a
/// presigned URL rewritten to the configured public endpoint.
#[derive(Debug, Clone)]
pub struct ObjectContent {
    pub content: Option<Vec<u8>>,
    pub content_type: String,
    pub url: String,
}

pub type StoreHandle = Arc<dyn ObjectStore + Send + Sync>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Idempotent: create the repository if it doesn't already exist.
    async fn ensure_repository(&self, repo_id: &str, default_branch: &str, storage_namespace: &str) -> Result<()>;

    /// Idempotent: create `branch` (from `source`) if it doesn't already exist.
    async fn ensure_branch(&self, repo_id: &str, branch: &str, source: &str) -> Result<()>;

    /// Commit `bytes` under `key` on `branch`. Returns [`UploadOutcome::NoChange`]
    /// rather than an error when the commit would be a no-op.
    async fn upload(
        &self,
        branch: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        user_metadata: HashMap<String, String>,
    ) -> Result<UploadOutcome>;

    /// Read an object at a specific version. `want_content` controls whether
    /// the bytes are fetched eagerly or only a presigned URL is produced.
    async fn read(&self, branch: &str, key: &str, version_id: &str, want_content: bool) -> Result<ObjectContent>;

    /// Commit a deletion of `key` at HEAD. Historical commits are untouched.
    async fn delete(&self, branch: &str, key: &str) -> Result<()>;

    /// List every key under `prefix` on `branch`.
    async fn list(&self, branch: &str, prefix: &str) -> Result<Vec<String>>;

    /// Bulk-delete every key under `asset_prefix` except `primary_filename`,
    /// as a single commit.
    async fn delete_associated(&self, branch: &str, asset_prefix: &str, primary_filename: &str) -> Result<()>;

    /// Identifier of the current HEAD commit touching `asset_path` on `branch`,
    /// or `None` if nothing has ever been committed there.
    async fn head_version(&self, branch: &str, asset_path: &str) -> Result<Option<String>>;
}

/// Rewrites the scheme and host of `private_url` to the configured public
/// endpoint, preserving path, query, and signature untouched.
///
/// This is the one piece of URL surgery every backend needs, so it lives
/// here rather than being duplicated per implementation.
pub fn rewrite_public_url(private_url: &str, public_endpoint: &str) -> Result<String> {
    use crate::error::ErrorKind;
    use exn::ResultExt;

    let mut private =
        url::Url::parse(private_url).or_raise(|| ErrorKind::BackendError("unparseable object URL".to_string()))?;
    let public =
        url::Url::parse(public_endpoint).or_raise(|| ErrorKind::BackendError("unparseable public endpoint".to_string()))?;
    private
        .set_scheme(public.scheme())
        .map_err(|()| ErrorKind::BackendError("cannot rewrite URL scheme".to_string()))?;
    private
        .set_host(public.host_str())
        .or_raise(|| ErrorKind::BackendError("cannot rewrite URL host".to_string()))?;
    private
        .set_port(public.port())
        .map_err(|()| ErrorKind::BackendError("cannot rewrite URL port".to_string()))?;
    Ok(private.to_string())
}
