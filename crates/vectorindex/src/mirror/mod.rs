//! The vector-index mirror contract.
//!
//! Four collections, one per media class (`other` has no mirror — there is
//! nothing searchable about an unclassified blob). Every record is a
//! placeholder: a fixed-dimension zero vector plus the asset's metadata as
//! a filterable payload, keyed by `(asset_path, version_id, branch)`. No
//! embedding model is wired in; see `ensure_collections` for why the
//! dimension is fixed rather than derived from a model.

mod http;
mod mock;

pub use http::HttpVectorMirror;
pub use mock::MockVectorMirror;

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Placeholder vector dimension. Every point carries a zero-filled vector
/// of this size alongside its payload; no embedding generation is in scope
/// here, so points are retrievable only by payload filter, never by
/// similarity search.
pub const VECTOR_DIM: usize = 1024;

/// The four media-class collections, in the order `ensure_collections`
/// creates them.
pub const COLLECTIONS: &[&str] = &["documents", "audios", "videos", "images"];

/// Maps the leading path segment of an `asset_path` (the media class's
/// base path) to its mirror collection. Returns `None` for `other`, which
/// has no collection.
pub fn collection_for(asset_path: &str) -> Option<&'static str> {
    let media_class = asset_path.split('/').next().unwrap_or(asset_path);
    match media_class {
        "document" => Some("documents"),
        "audio" => Some("audios"),
        "video" => Some("videos"),
        "image" => Some("images"),
        _ => None,
    }
}

fn collection_for_or_raise(asset_path: &str) -> Result<&'static str> {
    collection_for(asset_path).ok_or_else(|| ErrorKind::UnmappedMediaClass(asset_path.to_string()).into())
}

/// The payload stored (and filtered on) for one mirrored asset version.
/// Mirrors `AssetRecord` from `ledger-metadata` field-for-field rather than
/// depending on that crate directly, so the mirror stays a leaf in the
/// dependency graph and is unit-testable on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPayload {
    pub asset_path: String,
    pub version_id: String,
    pub branch: String,
    pub primary_filename: String,
    pub asset_key: String,
    pub associated_filenames: Vec<(String, String)>,
    pub upload_date: i64,
    pub archive_date: Option<i64>,
    pub destroy_date: Option<i64>,
    pub status: String,
    pub checksum: String,
}

pub type MirrorHandle = Arc<dyn VectorMirror + Send + Sync>;

#[async_trait]
pub trait VectorMirror: Send + Sync {
    /// Idempotent: create the four collections if they don't already exist,
    /// with [`VECTOR_DIM`] dimensions and cosine distance.
    async fn ensure_collections(&self) -> Result<()>;

    /// Insert a new point for `payload`, or update the existing one filtered
    /// by `(asset_path, version_id, branch)` if a match is found first.
    async fn upsert_or_update(&self, payload: &AssetPayload) -> Result<()>;

    /// Overwrite the payload of the point matching `payload`'s key.
    async fn update_payload(&self, payload: &AssetPayload) -> Result<()>;

    /// Set `status = "archived"` on the point matching the given key.
    async fn mark_archived(&self, asset_path: &str, version_id: &str, branch: &str) -> Result<()>;

    /// Remove the point matching the given key.
    async fn delete(&self, asset_path: &str, version_id: &str, branch: &str) -> Result<()>;
}
