use std::time::Duration;

use serde::Deserialize;

use crate::error::IngestError;
use crate::flatten::FlattenOptions;

fn default_schema_update_time() -> u64 {
    60
}
fn default_insert_batch_size() -> usize {
    10_000
}

/// Ingestion driver settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    /// Seconds a fetched table schema is reused. `0` re-fetches before
    /// every batch.
    #[serde(default = "default_schema_update_time")]
    pub schema_update_time: u64,
    /// Maximum rows per transport call.
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
    #[serde(default)]
    pub flatten: FlattenOptions,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            schema_update_time: default_schema_update_time(),
            insert_batch_size: default_insert_batch_size(),
            flatten: FlattenOptions::default(),
        }
    }
}

impl DriverConfig {
    pub fn with_schema_update_time(mut self, secs: u64) -> Self {
        self.schema_update_time = secs;
        self
    }

    pub fn schema_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_update_time)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.insert_batch_size == 0 {
            return Err(IngestError::Config("insert_batch_size must be positive".into()));
        }
        if self.flatten.separator.is_empty() {
            return Err(IngestError::Config("flatten.separator must not be empty".into()));
        }
        Ok(())
    }
}
