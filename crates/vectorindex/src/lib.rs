//! The vector-index mirror: a best-effort shadow of asset lifecycle state
//! in a Qdrant-shaped vector store, keyed on `(asset_path, version_id,
//! branch)`. Nothing here is authoritative — the metadata store always
//! wins a conflict, and every call in this crate is expected to be wrapped
//! by the coordinator in a "log and continue" policy rather than surfaced
//! to a caller.

pub mod error;
pub mod mirror;

pub use crate::mirror::{AssetPayload, COLLECTIONS, HttpVectorMirror, MirrorHandle, MockVectorMirror, VECTOR_DIM, VectorMirror, collection_for};
