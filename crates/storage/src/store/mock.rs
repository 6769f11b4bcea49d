//! In-memory, commit-based object store for tests.
//!
//! Models just enough of a lakeFS-shaped repository to exercise the
//! coordinator without a network: every `upload` that actually changes bytes
//! allocates a new monotonic version id and records which keys it touched,
//! so `head_version` can answer "what was the most recent commit that
//! touched this asset path" the same way the real backend would.

use super::{ObjectContent, ObjectStore, UploadOutcome};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone)]
struct Object {
    version_id: String,
    checksum: String,
    content_type: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Commit {
    branch: String,
    version_id: String,
    keys: Vec<String>,
}

/// In-memory [`ObjectStore`] for unit tests. Not suitable for production use:
/// all state is lost on process exit and nothing is actually persisted
/// durably between commits beyond the lifetime of the `RwLock`-guarded maps.
#[derive(Debug, Default)]
pub struct MockObjectStore {
    repositories: RwLock<HashSet<String>>,
    branches: RwLock<HashSet<(String, String)>>,
    /// Current live object per `(branch, key)`. Deleting a key removes its
    /// entry here but the `commits` log below still remembers it happened.
    live: RwLock<HashMap<(String, String), Object>>,
    /// Every committed version of every key, so reads by an explicit
    /// `version_id` keep working after a key is overwritten or deleted.
    history: RwLock<HashMap<(String, String, String), Object>>,
    commits: RwLock<Vec<Commit>>,
    counter: AtomicU64,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("v{n}")
    }

    fn record_commit(&self, branch: &str, version_id: &str, keys: Vec<String>) {
        self.commits.write().expect("mock lock poisoned").push(Commit {
            branch: branch.to_string(),
            version_id: version_id.to_string(),
            keys,
        });
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn ensure_repository(&self, repo_id: &str, _default_branch: &str, _storage_namespace: &str) -> Result<()> {
        self.repositories.write().expect("mock lock poisoned").insert(repo_id.to_string());
        Ok(())
    }

    async fn ensure_branch(&self, repo_id: &str, branch: &str, _source: &str) -> Result<()> {
        self.branches.write().expect("mock lock poisoned").insert((repo_id.to_string(), branch.to_string()));
        Ok(())
    }

    async fn upload(
        &self,
        branch: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        _user_metadata: HashMap<String, String>,
    ) -> Result<UploadOutcome> {
        let checksum = blake3::hash(&bytes).to_hex().to_string();
        {
            let live = self.live.read().expect("mock lock poisoned");
            if let Some(existing) = live.get(&(branch.to_string(), key.to_string())) {
                if existing.checksum == checksum {
                    return Ok(UploadOutcome::NoChange);
                }
            }
        }
        let version_id = self.next_version();
        let object = Object { version_id: version_id.clone(), checksum: checksum.clone(), content_type: content_type.to_string(), bytes };
        self.live.write().expect("mock lock poisoned").insert((branch.to_string(), key.to_string()), object.clone());
        self.history
            .write()
            .expect("mock lock poisoned")
            .insert((branch.to_string(), key.to_string(), version_id.clone()), object);
        self.record_commit(branch, &version_id, vec![key.to_string()]);
        Ok(UploadOutcome::Committed { version_id, checksum })
    }

    async fn read(&self, branch: &str, key: &str, version_id: &str, want_content: bool) -> Result<ObjectContent> {
        let history = self.history.read().expect("mock lock poisoned");
        let object = history
            .get(&(branch.to_string(), key.to_string(), version_id.to_string()))
            .ok_or_else(|| ErrorKind::NotFound(PathBuf::from(key)))?;
        Ok(ObjectContent {
            content: want_content.then(|| object.bytes.clone()),
            content_type: object.content_type.clone(),
            url: format!("mock://{branch}/{key}?version={version_id}"),
        })
    }

    async fn delete(&self, branch: &str, key: &str) -> Result<()> {
        let removed = self.live.write().expect("mock lock poisoned").remove(&(branch.to_string(), key.to_string()));
        if removed.is_some() {
            let version_id = self.next_version();
            self.record_commit(branch, &version_id, vec![key.to_string()]);
        }
        Ok(())
    }

    async fn list(&self, branch: &str, prefix: &str) -> Result<Vec<String>> {
        let live = self.live.read().expect("mock lock poisoned");
        let mut keys: Vec<String> = live
            .keys()
            .filter(|(b, key)| b == branch && key.starts_with(prefix))
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_associated(&self, branch: &str, asset_prefix: &str, primary_filename: &str) -> Result<()> {
        let to_remove: Vec<String> = {
            let live = self.live.read().expect("mock lock poisoned");
            live.keys()
                .filter(|(b, key)| b == branch && key.starts_with(asset_prefix) && !key.ends_with(primary_filename))
                .map(|(_, key)| key.clone())
                .collect()
        };
        if to_remove.is_empty() {
            return Ok(());
        }
        {
            let mut live = self.live.write().expect("mock lock poisoned");
            for key in &to_remove {
                live.remove(&(branch.to_string(), key.clone()));
            }
        }
        let version_id = self.next_version();
        self.record_commit(branch, &version_id, to_remove);
        Ok(())
    }

    async fn head_version(&self, branch: &str, asset_path: &str) -> Result<Option<String>> {
        let prefix = format!("{asset_path}/");
        let commits = self.commits.read().expect("mock lock poisoned");
        Ok(commits
            .iter()
            .rev()
            .find(|commit| commit.branch == branch && commit.keys.iter().any(|k| k.starts_with(&prefix)))
            .map(|commit| commit.version_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_identical_upload_is_no_change() {
        let store = MockObjectStore::new();
        let first = store.upload("b", "doc/report/report.pdf", b"hello".to_vec(), "application/pdf", HashMap::new()).await.unwrap();
        assert!(matches!(first, UploadOutcome::Committed { .. }));
        let second = store.upload("b", "doc/report/report.pdf", b"hello".to_vec(), "application/pdf", HashMap::new()).await.unwrap();
        assert_eq!(second, UploadOutcome::NoChange);
    }

    #[tokio::test]
    async fn head_version_tracks_latest_commit_under_asset_path() {
        let store = MockObjectStore::new();
        let UploadOutcome::Committed { version_id: v1, .. } =
            store.upload("b", "doc/report/report.pdf", b"one".to_vec(), "text/plain", HashMap::new()).await.unwrap()
        else {
            panic!("expected commit")
        };
        assert_eq!(store.head_version("b", "doc/report").await.unwrap(), Some(v1));
        let UploadOutcome::Committed { version_id: v2, .. } =
            store.upload("b", "doc/report/report.pdf", b"two".to_vec(), "text/plain", HashMap::new()).await.unwrap()
        else {
            panic!("expected commit")
        };
        assert_eq!(store.head_version("b", "doc/report").await.unwrap(), Some(v2));
    }

    #[tokio::test]
    async fn delete_associated_keeps_primary() {
        let store = MockObjectStore::new();
        store.upload("b", "doc/report/report.pdf", b"p".to_vec(), "text/plain", HashMap::new()).await.unwrap();
        store.upload("b", "doc/report/notes.txt", b"n".to_vec(), "text/plain", HashMap::new()).await.unwrap();
        store.delete_associated("b", "doc/report/", "report.pdf").await.unwrap();
        let keys = store.list("b", "doc/report/").await.unwrap();
        assert_eq!(keys, vec!["doc/report/report.pdf".to_string()]);
    }
}
