//! Layered startup configuration: defaults, an optional config file, then
//! `LEDGER_`-prefixed environment variables, merged through `figment` and
//! validated into a typed [`Settings`] before anything else in the
//! coordinator is constructed.

mod defaults;
pub mod error;
mod paths;
mod settings;

pub use crate::paths::default_config_file;
pub use crate::settings::{Settings, parse_hhmm};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, "{contents}").expect("write");
        file
    }

    fn minimal_toml() -> String {
        r#"
storage_endpoint = "http://localhost:8000"
storage_public_url = "https://assets.example.com"
storage_access_key = "access"
storage_secret_key = "secret"
default_bucket = "ledger-bucket"
repository_id = "ledger"
default_branch = "main"

metadata_host = "localhost"
metadata_user = "ledger"
metadata_password = "ledger"
metadata_database = "ledger"

vector_host = "localhost"

jwt_secret = "topsecret"
"#
        .to_string()
    }

    #[test]
    fn loads_defaults_layered_under_file() {
        let file = settings_file(&minimal_toml());
        let settings = Settings::load(file.path()).expect("load");
        assert_eq!(settings.default_retention_days, 30);
        assert_eq!(settings.upload_concurrency, 4);
        assert_eq!(settings.jwt_algorithm, "HS256");
        assert_eq!(settings.storage_access_key, "access");
    }

    #[test]
    fn environment_overrides_file() {
        let file = settings_file(&minimal_toml());
        // SAFETY: test is single-threaded with respect to this env var.
        unsafe {
            std::env::set_var("LEDGER_UPLOAD_CONCURRENCY", "8");
        }
        let settings = Settings::load(file.path()).expect("load");
        unsafe {
            std::env::remove_var("LEDGER_UPLOAD_CONCURRENCY");
        }
        assert_eq!(settings.upload_concurrency, 8);
    }

    #[test]
    fn rejects_out_of_range_concurrency() {
        let mut toml = minimal_toml();
        toml.push_str("upload_concurrency = 32\n");
        let file = settings_file(&toml);
        assert!(Settings::load(file.path()).is_err());
    }

    #[test]
    fn rejects_malformed_hhmm() {
        let mut toml = minimal_toml();
        toml.push_str("auto_archive_hhmm = \"25:61\"\n");
        let file = settings_file(&toml);
        assert!(Settings::load(file.path()).is_err());
    }

    #[test]
    fn rejects_non_iana_timezone() {
        let mut toml = minimal_toml();
        toml.push_str("timezone = \"nonsense\"\n");
        let file = settings_file(&toml);
        assert!(Settings::load(file.path()).is_err());
    }

    #[rstest::rstest]
    #[case("00:00", true)]
    #[case("23:59", true)]
    #[case("09:30", true)]
    #[case("24:00", false)]
    #[case("12:60", false)]
    #[case("not-a-time", false)]
    #[case("9:30", true)]
    fn parse_hhmm_accepts_only_valid_clock_times(#[case] value: &str, #[case] should_parse: bool) {
        assert_eq!(parse_hhmm("x", value).is_ok(), should_parse);
    }
}
