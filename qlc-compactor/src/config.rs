//! Environment-derived settings for connecting to the raw and compact
//! object stores, spec.md §6. Parsed from plain environment variables here;
//! `qlc-cli` layers `clap` argument parsing and `dotenvy` file loading on
//! top of this.

use anyhow::{Context, Result};

/// Connection settings for one object store endpoint.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

/// The full set of settings a compaction run needs: a raw store to read
/// from and a compact store to write to. These are frequently the same
/// physical endpoint with different buckets and credentials, but the
/// engine never assumes that.
#[derive(Debug, Clone)]
pub struct Config {
    pub raw: StoreConfig,
    pub compact: StoreConfig,
}

impl Config {
    /// Reads the settings from the environment, matching `run.py`'s
    /// variable names. `S3_COMPACT_ACCESS_KEY`/`S3_COMPACT_SECRET_KEY` fall
    /// back to the raw-store credentials when unset, for the common case of
    /// one endpoint shared between both stores.
    pub fn from_env() -> Result<Self> {
        let endpoint = require_env("S3_ENDPOINT")?;
        let access_key = require_env("S3_ACCESS_KEY")?;
        let secret_key = require_env("S3_SECRET_KEY")?;
        let raw_bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "quantlab-raw".to_string());
        let compact_bucket = std::env::var("S3_COMPACT_BUCKET").unwrap_or_else(|_| "quantlab-compact".to_string());

        let compact_access_key = std::env::var("S3_COMPACT_ACCESS_KEY").unwrap_or_else(|_| access_key.clone());
        let compact_secret_key = std::env::var("S3_COMPACT_SECRET_KEY").unwrap_or_else(|_| secret_key.clone());
        let compact_endpoint = std::env::var("S3_COMPACT_ENDPOINT").unwrap_or_else(|_| endpoint.clone());

        Ok(Config {
            raw: StoreConfig {
                endpoint,
                access_key,
                secret_key,
                bucket: raw_bucket,
            },
            compact: StoreConfig {
                endpoint: compact_endpoint,
                access_key: compact_access_key,
                secret_key: compact_secret_key,
                bucket: compact_bucket,
            },
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("missing required environment variable {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "S3_ENDPOINT",
        "S3_ACCESS_KEY",
        "S3_SECRET_KEY",
        "S3_BUCKET",
        "S3_COMPACT_BUCKET",
        "S3_COMPACT_ACCESS_KEY",
        "S3_COMPACT_SECRET_KEY",
        "S3_COMPACT_ENDPOINT",
    ];

    fn clear_all() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn missing_required_variable_is_an_error() {
        clear_all();
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("S3_ENDPOINT"));
    }

    #[test]
    #[serial]
    fn compact_store_falls_back_to_raw_credentials_and_endpoint() {
        clear_all();
        std::env::set_var("S3_ENDPOINT", "http://raw.example:9000");
        std::env::set_var("S3_ACCESS_KEY", "raw-key");
        std::env::set_var("S3_SECRET_KEY", "raw-secret");

        let config = Config::from_env().unwrap();
        assert_eq!(config.raw.bucket, "quantlab-raw");
        assert_eq!(config.compact.bucket, "quantlab-compact");
        assert_eq!(config.compact.endpoint, "http://raw.example:9000");
        assert_eq!(config.compact.access_key, "raw-key");
        assert_eq!(config.compact.secret_key, "raw-secret");
        clear_all();
    }

    #[test]
    #[serial]
    fn compact_store_overrides_take_precedence_over_raw_fallback() {
        clear_all();
        std::env::set_var("S3_ENDPOINT", "http://raw.example:9000");
        std::env::set_var("S3_ACCESS_KEY", "raw-key");
        std::env::set_var("S3_SECRET_KEY", "raw-secret");
        std::env::set_var("S3_BUCKET", "custom-raw");
        std::env::set_var("S3_COMPACT_BUCKET", "custom-compact");
        std::env::set_var("S3_COMPACT_ENDPOINT", "http://compact.example:9000");
        std::env::set_var("S3_COMPACT_ACCESS_KEY", "compact-key");
        std::env::set_var("S3_COMPACT_SECRET_KEY", "compact-secret");

        let config = Config::from_env().unwrap();
        assert_eq!(config.raw.bucket, "custom-raw");
        assert_eq!(config.compact.bucket, "custom-compact");
        assert_eq!(config.compact.endpoint, "http://compact.example:9000");
        assert_eq!(config.compact.access_key, "compact-key");
        assert_eq!(config.compact.secret_key, "compact-secret");
        clear_all();
    }
}
