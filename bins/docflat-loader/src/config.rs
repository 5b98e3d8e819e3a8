use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use docflat_core::DriverConfig;
use store_clickhouse::ClickHouseConfig;

use crate::error::LoaderError;

#[derive(Parser)]
#[command(name = "docflat-loader", about = "Store JSON documents into flat ClickHouse tables")]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "docflat.toml", env = "DOCFLAT_CONFIG")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load newline-delimited JSON documents into a table
    Load(LoadArgs),
}

#[derive(Args, Clone, Debug)]
pub struct LoadArgs {
    /// Target table
    #[arg(long)]
    pub table: String,

    /// NDJSON input file; stdin when omitted
    #[arg(long)]
    pub input: Option<String>,

    /// Run against an empty in-memory table and print the encoded rows
    #[arg(long)]
    pub dry_run: bool,
}

// ---- TOML Config ----

#[derive(Debug, Default, Deserialize)]
pub struct LoaderConfig {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,
}

impl LoaderConfig {
    pub fn load(path: &str) -> Result<Self, LoaderError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoaderError::Config {
            context: "read",
            detail: format!("'{path}': {e}"),
        })?;
        Self::parse(&content).map_err(|detail| LoaderError::Config {
            context: "parse",
            detail: format!("'{path}': {detail}"),
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(content).map_err(|e| e.to_string())?;
        config.driver.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_and_defaults() {
        let cfg = LoaderConfig::parse(
            r#"
            [driver]
            schema_update_time = 0

            [driver.flatten]
            separator = "__"

            [clickhouse]
            host = "ch.internal"
            database = "events"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.driver.schema_update_time, 0);
        assert_eq!(cfg.driver.insert_batch_size, 10_000);
        assert_eq!(cfg.driver.flatten.separator, "__");
        assert_eq!(cfg.clickhouse.host, "ch.internal");
        assert_eq!(cfg.clickhouse.port, 8123);
        assert_eq!(cfg.clickhouse.database, "events");
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let cfg = LoaderConfig::parse("").unwrap();
        assert_eq!(cfg.driver.schema_update_time, 60);
        assert_eq!(cfg.clickhouse.user, "default");
    }

    #[test]
    fn test_invalid_driver_settings_rejected() {
        let err = LoaderConfig::parse("[driver]\ninsert_batch_size = 0\n").unwrap_err();
        assert!(err.contains("insert_batch_size"), "{err}");
    }
}
