//! REST-backed [`VectorMirror`] speaking a Qdrant-shaped collection API.
//!
//! Qdrant (<https://qdrant.tech>) exposes collections of points (id, vector,
//! payload) filterable by payload field. This adapter talks to that REST
//! surface directly rather than through a generated client, since the
//! handful of calls the mirror needs (`scroll`, `upsert`, `set_payload`,
//! `delete`, `create_collection`) are a small, stable JSON surface.

use super::{AssetPayload, COLLECTIONS, VECTOR_DIM, VectorMirror, collection_for_or_raise};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

/// Client for a Qdrant instance hosting the four media-class collections.
#[derive(Debug, Clone)]
pub struct HttpVectorMirror {
    client: Client,
    base_url: String,
}

impl HttpVectorMirror {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .or_raise(|| ErrorKind::BackendError("failed to construct HTTP client".to_string()))?;
        Ok(Self { client, base_url: format!("http://{host}:{port}") })
    }

    fn key_filter(asset_path: &str, version_id: &str, branch: &str) -> serde_json::Value {
        json!({
            "must": [
                { "key": "asset_path", "match": { "value": asset_path } },
                { "key": "version_id", "match": { "value": version_id } },
                { "key": "branch", "match": { "value": branch } },
            ]
        })
    }

    /// Find the point id matching `payload`'s key, if a point already
    /// exists for it in `collection`.
    async fn find_point_id(&self, collection: &str, asset_path: &str, version_id: &str, branch: &str) -> Result<Option<String>> {
        let url = format!("{}/collections/{collection}/points/scroll", self.base_url);
        let body = json!({ "filter": Self::key_filter(asset_path, version_id, branch), "limit": 1 });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("scrolling collection {collection}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            exn::bail!(ErrorKind::BackendError(format!("scroll failed ({status}): {text}")));
        }
        #[derive(serde::Deserialize)]
        struct Point {
            id: serde_json::Value,
        }
        #[derive(serde::Deserialize)]
        struct ScrollResult {
            points: Vec<Point>,
        }
        #[derive(serde::Deserialize)]
        struct ScrollResponse {
            result: ScrollResult,
        }
        let parsed: ScrollResponse =
            response.json().await.or_raise(|| ErrorKind::BackendError("malformed scroll response".to_string()))?;
        Ok(parsed.result.points.into_iter().next().map(|p| p.id.to_string()))
    }
}

#[async_trait]
impl VectorMirror for HttpVectorMirror {
    async fn ensure_collections(&self) -> Result<()> {
        for collection in COLLECTIONS {
            let url = format!("{}/collections/{collection}", self.base_url);
            let existing = self
                .client
                .get(&url)
                .send()
                .await
                .or_raise(|| ErrorKind::Network(format!("checking collection {collection}")))?;
            if existing.status().is_success() {
                continue;
            }
            let body = json!({ "vectors": { "size": VECTOR_DIM, "distance": "Cosine" } });
            let response = self
                .client
                .put(&url)
                .json(&body)
                .send()
                .await
                .or_raise(|| ErrorKind::Network(format!("creating collection {collection}")))?;
            if !response.status().is_success() && response.status() != StatusCode::CONFLICT {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                exn::bail!(ErrorKind::BackendError(format!("create_collection {collection} failed ({status}): {text}")));
            }
        }
        Ok(())
    }

    async fn upsert_or_update(&self, payload: &AssetPayload) -> Result<()> {
        let collection = collection_for_or_raise(&payload.asset_path)?;
        if self.find_point_id(collection, &payload.asset_path, &payload.version_id, &payload.branch).await?.is_some() {
            return self.update_payload(payload).await;
        }
        let url = format!("{}/collections/{collection}/points", self.base_url);
        let point = json!({
            "points": [{
                "id": Uuid::new_v4().to_string(),
                "vector": vec![0.0f32; VECTOR_DIM],
                "payload": payload,
            }]
        });
        let response = self
            .client
            .put(&url)
            .json(&point)
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("upserting point in {collection}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            exn::bail!(ErrorKind::BackendError(format!("upsert failed ({status}): {text}")));
        }
        Ok(())
    }

    async fn update_payload(&self, payload: &AssetPayload) -> Result<()> {
        let collection = collection_for_or_raise(&payload.asset_path)?;
        let url = format!("{}/collections/{collection}/points/payload", self.base_url);
        let body = json!({
            "payload": payload,
            "filter": Self::key_filter(&payload.asset_path, &payload.version_id, &payload.branch),
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("setting payload in {collection}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            exn::bail!(ErrorKind::BackendError(format!("set_payload failed ({status}): {text}")));
        }
        Ok(())
    }

    async fn mark_archived(&self, asset_path: &str, version_id: &str, branch: &str) -> Result<()> {
        let collection = collection_for_or_raise(asset_path)?;
        let url = format!("{}/collections/{collection}/points/payload", self.base_url);
        let body = json!({
            "payload": { "status": "archived" },
            "filter": Self::key_filter(asset_path, version_id, branch),
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("archiving payload in {collection}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            exn::bail!(ErrorKind::BackendError(format!("archive set_payload failed ({status}): {text}")));
        }
        Ok(())
    }

    async fn delete(&self, asset_path: &str, version_id: &str, branch: &str) -> Result<()> {
        let collection = collection_for_or_raise(asset_path)?;
        let url = format!("{}/collections/{collection}/points/delete", self.base_url);
        let body = json!({ "filter": Self::key_filter(asset_path, version_id, branch) });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("deleting point in {collection}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            exn::bail!(ErrorKind::BackendError(format!("delete failed ({status}): {text}")));
        }
        Ok(())
    }
}
