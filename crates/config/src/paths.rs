//! Platform-appropriate default locations, via the `directories` crate.

use std::path::PathBuf;

const QUALIFIER: &str = "";
const ORGANIZATION: &str = "";
const APPLICATION: &str = "ledger";

/// The default config file path (`config.toml` inside the platform's config
/// directory for this application, e.g. `~/.config/ledger/config.toml` on
/// Linux). Used by [`crate::Settings::load_default`] when no explicit path
/// is given.
pub fn default_config_file() -> PathBuf {
    directories::ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}
