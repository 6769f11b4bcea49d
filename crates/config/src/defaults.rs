//! Built-in defaults, as a [`figment::Provider`]. Sits at the bottom of the
//! layer stack so every field is always present once the file and
//! environment layers are merged on top, even on a from-scratch deployment.

use figment::Figment;
use figment::providers::{Format, Serialized, Toml};

/// Fields with sane out-of-the-box values. Everything else (credentials,
/// hosts, secrets) has no sensible default and must come from the config
/// file or environment.
#[derive(Debug, serde::Serialize)]
pub struct Defaults {
    pub default_retention_days: u32,
    pub main_branch_retention_days: u32,
    pub metadata_port: u16,
    pub vector_port: u16,
    pub jwt_algorithm: String,
    pub access_token_ttl_minutes: u32,
    pub timezone: String,
    pub auto_archive_hhmm: String,
    pub auto_destroy_hhmm: String,
    pub audit_retention_days: u32,
    pub upload_concurrency: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            default_retention_days: 30,
            main_branch_retention_days: 90,
            metadata_port: 3306,
            vector_port: 6333,
            jwt_algorithm: "HS256".to_string(),
            access_token_ttl_minutes: 60,
            timezone: "UTC".to_string(),
            auto_archive_hhmm: "02:00".to_string(),
            auto_destroy_hhmm: "02:30".to_string(),
            audit_retention_days: 120,
            upload_concurrency: 4,
        }
    }
}

pub(crate) fn base_figment() -> Figment {
    Figment::new().merge(Serialized::defaults(Defaults::default()))
}

/// Builds the `Toml` layer for an optional config file path, a no-op
/// provider (merging nothing) when the path doesn't exist.
pub(crate) fn file_layer(path: &std::path::Path) -> Toml {
    Toml::file(path)
}
