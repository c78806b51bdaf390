use crate::api::Account;
use crate::foresight::DEFAULT_BATCH_CAP;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Server settings, read from an optional TOML file and `FORESIGHT_*`
/// environment variables. Command line arguments are applied on top.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    #[serde(default = "default_port")]
    pub port: u16,
    /// sqlx connection string, in-memory if unset
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default)]
    pub operator: Option<Account>,
    #[serde(default = "default_batch_cap")]
    pub batch_cap: u32,
    /// Skips access token checks and exposes the test ledger routes.
    #[serde(default)]
    pub test: bool,
    #[serde(default)]
    pub oracle_url: Option<String>,
}

fn default_port() -> u16 {
    8081
}
fn default_batch_cap() -> u32 {
    DEFAULT_BATCH_CAP
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: default_port(),
            db: None,
            operator: None,
            batch_cap: default_batch_cap(),
            test: false,
            oracle_url: None,
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("FORESIGHT"))
            .build()
            .with_context(|| format!("failed to read settings from {}", path))?
            .try_deserialize()
            .context("invalid settings")?;
        Ok(Settings {
            batch_cap: settings.batch_cap.max(1),
            ..settings
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn missing_file_means_defaults() {
        let settings = Settings::load("/nonexistent/foresight").unwrap();
        assert_eq!(settings.batch_cap, DEFAULT_BATCH_CAP);
        assert_eq!(settings.db, None);
    }

    #[test]
    fn reads_toml_and_clamps_batch_cap() {
        let path = std::env::temp_dir().join("foresight-settings-test.toml");
        fs::write(
            &path,
            "port = 9000\nbatch_cap = 0\ntest = true\n\
             operator = \"023d51452445aa81ecc3cfcb82dbfe937707db5c89f9f9d21d64835158df405d8c\"\n",
        )
        .unwrap();
        let settings = Settings::load(path.to_str().unwrap()).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.batch_cap, 1);
        assert!(settings.test);
        assert!(settings.operator.is_some());
        assert_eq!(settings.oracle_url, None);
    }
}
