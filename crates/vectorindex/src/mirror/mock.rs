//! In-memory [`VectorMirror`] for tests.

use super::{AssetPayload, VectorMirror, collection_for_or_raise};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

type Key = (String, String, String);

/// In-memory vector mirror. Keeps one table per collection so a lookup by
/// `asset_path` always lands in the right "collection" the way the real
/// Qdrant-backed adapter would.
#[derive(Debug, Default)]
pub struct MockVectorMirror {
    collections: RwLock<HashMap<&'static str, HashMap<Key, AssetPayload>>>,
}

impl MockVectorMirror {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(payload: &AssetPayload) -> Key {
        (payload.asset_path.clone(), payload.version_id.clone(), payload.branch.clone())
    }

    /// Test helper: read back a payload directly.
    pub fn get(&self, asset_path: &str, version_id: &str, branch: &str) -> Option<AssetPayload> {
        let collection = collection_for_or_raise(asset_path).ok()?;
        self.collections
            .read()
            .expect("mock lock poisoned")
            .get(collection)?
            .get(&(asset_path.to_string(), version_id.to_string(), branch.to_string()))
            .cloned()
    }
}

#[async_trait]
impl VectorMirror for MockVectorMirror {
    async fn ensure_collections(&self) -> Result<()> {
        let mut collections = self.collections.write().expect("mock lock poisoned");
        for name in super::COLLECTIONS {
            collections.entry(name).or_default();
        }
        Ok(())
    }

    async fn upsert_or_update(&self, payload: &AssetPayload) -> Result<()> {
        let collection = collection_for_or_raise(&payload.asset_path)?;
        let mut collections = self.collections.write().expect("mock lock poisoned");
        collections.entry(collection).or_default().insert(Self::key(payload), payload.clone());
        Ok(())
    }

    async fn update_payload(&self, payload: &AssetPayload) -> Result<()> {
        self.upsert_or_update(payload).await
    }

    async fn mark_archived(&self, asset_path: &str, version_id: &str, branch: &str) -> Result<()> {
        let collection = collection_for_or_raise(asset_path)?;
        let mut collections = self.collections.write().expect("mock lock poisoned");
        if let Some(entry) =
            collections.entry(collection).or_default().get_mut(&(asset_path.to_string(), version_id.to_string(), branch.to_string()))
        {
            entry.status = "archived".to_string();
        }
        Ok(())
    }

    async fn delete(&self, asset_path: &str, version_id: &str, branch: &str) -> Result<()> {
        let collection = collection_for_or_raise(asset_path)?;
        let mut collections = self.collections.write().expect("mock lock poisoned");
        collections.entry(collection).or_default().remove(&(asset_path.to_string(), version_id.to_string(), branch.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(asset_path: &str, version_id: &str) -> AssetPayload {
        AssetPayload {
            asset_path: asset_path.to_string(),
            version_id: version_id.to_string(),
            branch: "alice_space".to_string(),
            primary_filename: "greeting.txt".to_string(),
            asset_key: format!("{asset_path}/greeting.txt"),
            associated_filenames: vec![],
            upload_date: 0,
            archive_date: None,
            destroy_date: None,
            status: "active".to_string(),
            checksum: "abc".to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_then_mark_archived_is_visible() {
        let mirror = MockVectorMirror::new();
        mirror.ensure_collections().await.unwrap();
        mirror.upsert_or_update(&payload("document/greeting", "v1")).await.unwrap();
        mirror.mark_archived("document/greeting", "v1", "alice_space").await.unwrap();
        let stored = mirror.get("document/greeting", "v1", "alice_space").unwrap();
        assert_eq!(stored.status, "archived");
    }

    #[tokio::test]
    async fn delete_removes_point() {
        let mirror = MockVectorMirror::new();
        mirror.upsert_or_update(&payload("video/clip", "v1")).await.unwrap();
        mirror.delete("video/clip", "v1", "alice_space").await.unwrap();
        assert!(mirror.get("video/clip", "v1", "alice_space").is_none());
    }

    #[tokio::test]
    async fn other_media_class_is_rejected() {
        let mirror = MockVectorMirror::new();
        let result = mirror.upsert_or_update(&payload("other/blob", "v1")).await;
        assert!(result.is_err());
    }
}
