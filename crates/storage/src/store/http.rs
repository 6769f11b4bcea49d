//! REST-backed [`ObjectStore`] speaking a lakeFS-shaped commit API.
//!
//! lakeFS (<https://lakefs.io>) models a bucket of objects as a git-like
//! repository: branches are refs, every write is staged then committed, and
//! a commit id is the stable "version" of everything it touched. This
//! adapter talks to that API directly over HTTP rather than through a
//! vendored SDK, since the wire contract (basic auth + a small JSON REST
//! surface) is simple enough not to need one.

use super::{ObjectContent, ObjectStore, UploadOutcome};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Client for a single lakeFS repository.
///
/// `endpoint` is the private/internal API base URL used for every request;
/// `public_endpoint` is substituted in for presigned URLs returned to
/// callers outside the deployment.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: String,
    public_endpoint: String,
    repository: String,
    access_key: String,
    secret_key: String,
}

#[derive(Debug, Serialize)]
struct CreateRepositoryBody<'a> {
    name: &'a str,
    storage_namespace: &'a str,
    default_branch: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateBranchBody<'a> {
    name: &'a str,
    source: &'a str,
}

#[derive(Debug, Serialize)]
struct CommitBody<'a> {
    message: &'a str,
    metadata: &'a HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatResponse {
    checksum: String,
    content_type: Option<String>,
    physical_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    path: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    results: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    id: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct LogResponse {
    results: Vec<LogEntry>,
}

impl HttpObjectStore {
    /// Build a client against `endpoint` (the private API host) authenticated
    /// with a lakeFS access key pair. `public_endpoint` is the host presigned
    /// URLs get rewritten to before being returned to callers.
    pub fn new(
        endpoint: impl Into<String>,
        public_endpoint: impl Into<String>,
        repository: impl Into<String>,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .or_raise(|| ErrorKind::BackendError("failed to construct HTTP client".to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            public_endpoint: public_endpoint.into(),
            repository: repository.into(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(&self.access_key, Some(&self.secret_key))
    }

    async fn request_json<T: for<'de> Deserialize<'de>>(&self, response: reqwest::Response, key: &str) -> Result<T> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ErrorKind::NotFound(PathBuf::from(key)).into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorKind::BackendError(format!("lakefs returned {status}: {body}")).into());
        }
        response.json::<T>().await.or_raise(|| ErrorKind::BackendError("malformed lakefs response body".to_string()))
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn ensure_repository(&self, repo_id: &str, default_branch: &str, storage_namespace: &str) -> Result<()> {
        let url = format!("{}/api/v1/repositories", self.endpoint);
        let response = self
            .authed(self.client.post(&url))
            .json(&CreateRepositoryBody { name: repo_id, storage_namespace, default_branch })
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("connecting to {url}")))?;
        match response.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::CONFLICT => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ErrorKind::BackendError(format!("ensure_repository failed ({status}): {body}")).into())
            },
        }
    }

    async fn ensure_branch(&self, repo_id: &str, branch: &str, source: &str) -> Result<()> {
        let url = format!("{}/api/v1/repositories/{repo_id}/branches", self.endpoint);
        let response = self
            .authed(self.client.post(&url))
            .json(&CreateBranchBody { name: branch, source })
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("connecting to {url}")))?;
        match response.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::CONFLICT => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ErrorKind::BackendError(format!("ensure_branch failed ({status}): {body}")).into())
            },
        }
    }

    async fn upload(
        &self,
        branch: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        user_metadata: HashMap<String, String>,
    ) -> Result<UploadOutcome> {
        let stage_url = format!(
            "{}/api/v1/repositories/{}/branches/{branch}/objects",
            self.endpoint, self.repository
        );
        let response = self
            .authed(self.client.post(&stage_url))
            .query(&[("path", key)])
            .header("content-type", content_type)
            .body(bytes)
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("staging object at {key}")))?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorKind::BackendError(format!("failed to stage {key}: {body}")).into());
        }

        let commit_url =
            format!("{}/api/v1/repositories/{}/branches/{branch}/commits", self.endpoint, self.repository);
        let response = self
            .authed(self.client.post(&commit_url))
            .json(&CommitBody { message: &format!("Upload file {key}"), metadata: &user_metadata })
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("committing {key}")))?;
        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if body.to_lowercase().contains("no changes") {
                return Ok(UploadOutcome::NoChange);
            }
            return Err(ErrorKind::BackendError(format!("commit rejected for {key}: {body}")).into());
        }
        let commit: CommitResponse = self.request_json(response, key).await?;

        let stat = self.stat(branch, key, &commit.id).await?;
        Ok(UploadOutcome::Committed { version_id: commit.id, checksum: stat.checksum })
    }

    async fn read(&self, branch: &str, key: &str, version_id: &str, want_content: bool) -> Result<ObjectContent> {
        let url = self.generate_presigned_url(key, version_id).await?;
        let stat = self.stat(branch, key, version_id).await?;
        let content = if want_content {
            let response = self
                .authed(self.client.get(&url))
                .send()
                .await
                .or_raise(|| ErrorKind::Network(format!("reading {key}")))?;
            if !response.status().is_success() {
                return Err(ErrorKind::NotFound(PathBuf::from(key)).into());
            }
            Some(response.bytes().await.or_raise(|| ErrorKind::Network("reading object body".to_string()))?.to_vec())
        } else {
            None
        };
        Ok(ObjectContent { content, content_type: stat.content_type.unwrap_or_else(|| "application/octet-stream".to_string()), url })
    }

    async fn delete(&self, branch: &str, key: &str) -> Result<()> {
        let url = format!(
            "{}/api/v1/repositories/{}/branches/{branch}/objects",
            self.endpoint, self.repository
        );
        let response = self
            .authed(self.client.delete(&url))
            .query(&[("path", key)])
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("deleting {key}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorKind::BackendError(format!("failed to delete {key}: {body}")).into());
        }
        let commit_url =
            format!("{}/api/v1/repositories/{}/branches/{branch}/commits", self.endpoint, self.repository);
        self.authed(self.client.post(&commit_url))
            .json(&CommitBody { message: &format!("Delete file {key}"), metadata: &HashMap::new() })
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("committing deletion of {key}")))?;
        Ok(())
    }

    async fn list(&self, branch: &str, prefix: &str) -> Result<Vec<String>> {
        let url =
            format!("{}/api/v1/repositories/{}/refs/{branch}/objects/ls", self.endpoint, self.repository);
        let response = self
            .authed(self.client.get(&url))
            .query(&[("prefix", prefix)])
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("listing {prefix}")))?;
        let listing: ListResponse = self.request_json(response, prefix).await?;
        Ok(listing.results.into_iter().map(|entry| entry.path).collect())
    }

    async fn delete_associated(&self, branch: &str, asset_prefix: &str, primary_filename: &str) -> Result<()> {
        let keys = self.list(branch, asset_prefix).await?;
        let associated: Vec<String> = keys.into_iter().filter(|key| !key.ends_with(primary_filename)).collect();
        if associated.is_empty() {
            return Ok(());
        }
        for key in &associated {
            let url = format!(
                "{}/api/v1/repositories/{}/branches/{branch}/objects",
                self.endpoint, self.repository
            );
            self.authed(self.client.delete(&url))
                .query(&[("path", key.as_str())])
                .send()
                .await
                .or_raise(|| ErrorKind::Network(format!("deleting associated object {key}")))?;
        }
        let commit_url =
            format!("{}/api/v1/repositories/{}/branches/{branch}/commits", self.endpoint, self.repository);
        self.authed(self.client.post(&commit_url))
            .json(&CommitBody {
                message: &format!("Delete associated files in {asset_prefix}"),
                metadata: &HashMap::new(),
            })
            .send()
            .await
            .or_raise(|| ErrorKind::Network("committing associated-file deletion".to_string()))?;
        Ok(())
    }

    async fn head_version(&self, branch: &str, asset_path: &str) -> Result<Option<String>> {
        let url = format!("{}/api/v1/repositories/{}/refs/{branch}/commits", self.endpoint, self.repository);
        let response = self
            .authed(self.client.get(&url))
            .send()
            .await
            .or_raise(|| ErrorKind::Network("listing commit log".to_string()))?;
        let log: LogResponse = self.request_json(response, asset_path).await?;
        Ok(log.results.into_iter().find(|entry| entry.message.contains(asset_path)).map(|entry| entry.id))
    }
}

impl HttpObjectStore {
    async fn stat(&self, branch: &str, key: &str, version_id: &str) -> Result<StatResponse> {
        let _ = branch;
        let url = format!("{}/api/v1/repositories/{}/refs/{version_id}/objects/stat", self.endpoint, self.repository);
        let response = self
            .authed(self.client.get(&url))
            .query(&[("path", key)])
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("stat {key}")))?;
        self.request_json(response, key).await
    }

    /// Generate a presigned URL for `key` at `version_id`, rewritten to the
    /// configured public endpoint.
    pub async fn generate_presigned_url(&self, key: &str, version_id: &str) -> Result<String> {
        let url = format!("{}/api/v1/repositories/{}/refs/{version_id}/objects", self.endpoint, self.repository);
        let response = self
            .authed(self.client.get(&url))
            .query(&[("path", key), ("presign", "true")])
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("presigning {key}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ErrorKind::NotFound(PathBuf::from(key)).into());
        }
        let stat: StatResponse = self.request_json(response, key).await?;
        let private = stat.physical_address.ok_or_raise(|| ErrorKind::BackendError("no physical address in stat response".to_string()))?;
        super::rewrite_public_url(&private, &self.public_endpoint)
    }
}
