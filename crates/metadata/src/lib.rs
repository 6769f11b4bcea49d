//! The relational metadata store: `commit_history`, `users`, `audit_log`.
//!
//! This is the authoritative record of every asset version and its
//! lifecycle status. The object store and vector mirror are kept
//! eventually consistent with it by the coordinator crate, never the
//! other way around.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{
    ALL_PERMISSIONS, AssetRecord, AssetStatus, AuditEvent, ChangeStatus, SHARED_USER_PERMISSIONS, UserRecord,
    VersionSummary,
};
pub use crate::repo::MetadataStore;
