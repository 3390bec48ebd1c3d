use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::postgres::{DEFAULT_CURSOR_TABLE, is_valid_table_name};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigLoadError {
    #[error("PROJECTOR_BATCH_SIZE must be a positive integer, got {0:?}")]
    InvalidBatchSize(String),

    #[error("PROJECTOR_CURSOR_TABLE is not a valid table name: {0:?}")]
    InvalidTableName(String),
}

/// Process-level settings for a projection worker.
///
/// | Variable | Default |
/// |----------|---------|
/// | `PROJECTOR_BATCH_SIZE` | `100` |
/// | `PROJECTOR_DATABASE_URL` | unset (in-memory checkpoints) |
/// | `PROJECTOR_CURSOR_TABLE` | `projection_cursors` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Most envelopes handed to one `project` call.
    pub batch_size: usize,
    pub database_url: Option<String>,
    pub cursor_table: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            database_url: None,
            cursor_table: DEFAULT_CURSOR_TABLE.to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigLoadError> {
        let batch_size = match lookup("PROJECTOR_BATCH_SIZE") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigLoadError::InvalidBatchSize(raw)),
            },
            None => DEFAULT_BATCH_SIZE,
        };

        let database_url = lookup("PROJECTOR_DATABASE_URL").filter(|url| !url.trim().is_empty());

        let cursor_table = lookup("PROJECTOR_CURSOR_TABLE").unwrap_or_else(|| DEFAULT_CURSOR_TABLE.to_string());
        if !is_valid_table_name(&cursor_table) {
            return Err(ConfigLoadError::InvalidTableName(cursor_table));
        }

        Ok(Self {
            batch_size,
            database_url,
            cursor_table,
        })
    }
}
