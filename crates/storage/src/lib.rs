//! Path sanitization, file typing, and the versioned object store adapter.
//!
//! This crate covers the path/filename sanitizer, the file-type classifier,
//! and the `ObjectStore` trait: a lakeFS-shaped content-addressed store
//! where every mutation is one commit and `version_id` maps 1:1 onto a
//! metadata row in the layer above this crate.

pub mod error;
pub mod path;
pub mod store;
pub mod typer;

pub use crate::path::{sanitize_filename, validate as validate_path};
pub use crate::store::{MockObjectStore, ObjectContent, ObjectStore, StoreHandle, UploadOutcome};
pub use crate::typer::{FileType, MediaClass, classify, stem};
