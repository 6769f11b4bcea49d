use crate::defaults::base_figment;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::providers::Env;
use serde::Deserialize;
use std::path::Path;
use tracing::instrument;

/// Validated startup configuration for the asset ledger service.
///
/// Loaded once, at process start, through [`Settings::load`]. Every field
/// here is guaranteed present and in-range by the time a [`Settings`] value
/// exists — downstream code never needs to re-check a TTL or re-parse a
/// timezone.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    // --- object store (lakeFS-shaped) ---
    pub storage_endpoint: String,
    pub storage_public_url: String,
    pub storage_access_key: String,
    pub storage_secret_key: String,
    pub default_bucket: String,
    pub repository_id: String,
    pub default_branch: String,
    pub default_retention_days: u32,
    pub main_branch_retention_days: u32,

    // --- metadata store (SQL) ---
    pub metadata_host: String,
    pub metadata_port: u16,
    pub metadata_user: String,
    pub metadata_password: String,
    pub metadata_database: String,

    // --- vector mirror ---
    pub vector_host: String,
    pub vector_port: u16,

    // --- auth ---
    pub jwt_secret: String,
    pub jwt_algorithm: String,
    pub access_token_ttl_minutes: u32,

    // --- scheduling ---
    pub timezone: String,
    pub auto_archive_hhmm: String,
    pub auto_destroy_hhmm: String,

    // --- ambient ---
    pub audit_retention_days: u32,
    pub upload_concurrency: usize,
}

const MIN_UPLOAD_CONCURRENCY: usize = 1;
const MAX_UPLOAD_CONCURRENCY: usize = 16;

impl Settings {
    /// Loads configuration with precedence `defaults < config file < environment`.
    ///
    /// The config file layer is only applied if `config_path` exists; a
    /// missing file is not an error (a from-scratch deployment may run on
    /// environment variables alone). Environment variables are read with
    /// the `LEDGER_` prefix, e.g. `LEDGER_JWT_SECRET`.
    #[instrument("loading configuration", skip_all, fields(path = %config_path.as_ref().display()))]
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref();
        let mut figment = base_figment();
        if config_path.exists() {
            figment = figment.merge(crate::defaults::file_layer(config_path));
        }
        figment = figment.merge(Env::prefixed("LEDGER_"));

        let settings: Settings =
            figment.extract().or_raise(|| ErrorKind::Load(format!("loading {}", config_path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads configuration from the platform default config directory
    /// (`~/.config/ledger/config.toml` on Linux, via the `directories`
    /// crate), falling back silently to defaults + environment if absent.
    pub fn load_default() -> Result<Self> {
        let path = crate::paths::default_config_file();
        Self::load(path)
    }

    fn validate(&self) -> Result<()> {
        if self.default_retention_days == 0 {
            return Err(ErrorKind::InvalidValue {
                field: "default_retention_days",
                reason: "must be at least 1 day".to_string(),
            }
            .into());
        }
        if self.main_branch_retention_days == 0 {
            return Err(ErrorKind::InvalidValue {
                field: "main_branch_retention_days",
                reason: "must be at least 1 day".to_string(),
            }
            .into());
        }
        if self.access_token_ttl_minutes == 0 {
            return Err(ErrorKind::InvalidValue {
                field: "access_token_ttl_minutes",
                reason: "must be at least 1 minute".to_string(),
            }
            .into());
        }
        if !(MIN_UPLOAD_CONCURRENCY..=MAX_UPLOAD_CONCURRENCY).contains(&self.upload_concurrency) {
            return Err(ErrorKind::InvalidValue {
                field: "upload_concurrency",
                reason: format!("must be between {MIN_UPLOAD_CONCURRENCY} and {MAX_UPLOAD_CONCURRENCY}"),
            }
            .into());
        }
        parse_hhmm("auto_archive_hhmm", &self.auto_archive_hhmm)?;
        parse_hhmm("auto_destroy_hhmm", &self.auto_destroy_hhmm)?;
        validate_timezone(&self.timezone)?;
        Ok(())
    }
}

/// Parses `"HH:MM"` into `(hour, minute)`, rejecting anything out of range.
/// Used both for validation here and by the scheduler to build its cron
/// triggers.
pub fn parse_hhmm(field: &'static str, value: &str) -> Result<(u8, u8)> {
    let invalid = || ErrorKind::InvalidValue { field, reason: format!("`{value}` is not a valid HH:MM time") };
    let (hour, minute) = value.split_once(':').ok_or_else(|| invalid())?;
    let hour: u8 = hour.parse().map_err(|_| invalid())?;
    let minute: u8 = minute.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid().into());
    }
    Ok((hour, minute))
}

/// Sanity-checks an IANA-shaped timezone name (`Region/City`). No tz
/// database is linked in, so this accepts `"UTC"` and any two-segment name;
/// actual offset resolution is the scheduler's job.
fn validate_timezone(value: &str) -> Result<()> {
    if value == "UTC" || value.split('/').count() == 2 {
        return Ok(());
    }
    Err(ErrorKind::InvalidValue {
        field: "timezone",
        reason: format!("`{value}` is not `UTC` or an `Area/Location` IANA name"),
    }
    .into())
}
