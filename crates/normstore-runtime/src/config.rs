use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Configuration for a [`Store`](crate::Store).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of released operations kept retained before their release is
    /// processed. Zero still buffers each release once.
    pub release_buffer_size: usize,
    /// Age after which a written operation checks as stale. `None` disables
    /// expiration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_cache_expiration: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            release_buffer_size: 10,
            query_cache_expiration: None,
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from TOML. Absent keys take their defaults.
    pub fn from_toml_str(input: &str) -> StoreResult<Self> {
        toml::from_str(input).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Config(e.to_string()))
    }
}
