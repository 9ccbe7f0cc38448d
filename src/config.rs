//! Configuration for live queries
//!
//! Values come from defaults, optionally overridden by a TOML file and then
//! by `LIVEDOC_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{LiveError, Result};
use crate::normalize::{SortSpec, DEFAULT_TIMESTAMP_FIELD};

/// Default number of records per page
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Default owner field used by owner-filtered lists
pub const DEFAULT_OWNER_FIELD: &str = "uid";

/// Default channel capacity for in-memory listeners
pub const DEFAULT_LISTENER_BUFFER: usize = 256;

/// Live query configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Page size used when the caller does not pass one
    pub default_page_size: usize,
    /// Field used for ordering and cursors
    pub timestamp_field: String,
    /// Field compared against the owner id in owner-filtered lists
    pub owner_field: String,
    /// Pending snapshot capacity per in-memory listener
    pub listener_buffer: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.to_string(),
            owner_field: DEFAULT_OWNER_FIELD.to_string(),
            listener_buffer: DEFAULT_LISTENER_BUFFER,
        }
    }
}

impl LiveConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: LiveConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `LIVEDOC_*` environment overrides on top of `self`
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LIVEDOC_PAGE_SIZE") {
            self.default_page_size = v
                .parse()
                .map_err(|_| LiveError::Config(format!("LIVEDOC_PAGE_SIZE: not a number: {}", v)))?;
        }
        if let Some(v) = lookup("LIVEDOC_TIMESTAMP_FIELD") {
            self.timestamp_field = v;
        }
        if let Some(v) = lookup("LIVEDOC_OWNER_FIELD") {
            self.owner_field = v;
        }
        if let Some(v) = lookup("LIVEDOC_LISTENER_BUFFER") {
            self.listener_buffer = v.parse().map_err(|_| {
                LiveError::Config(format!("LIVEDOC_LISTENER_BUFFER: not a number: {}", v))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_page_size == 0 {
            return Err(LiveError::Config("default_page_size must be positive".to_string()));
        }
        if self.listener_buffer == 0 {
            return Err(LiveError::Config("listener_buffer must be positive".to_string()));
        }
        if self.timestamp_field.trim().is_empty() {
            return Err(LiveError::Config("timestamp_field is empty".to_string()));
        }
        if self.owner_field.trim().is_empty() {
            return Err(LiveError::Config("owner_field is empty".to_string()));
        }
        Ok(())
    }

    /// Newest-first ordering on the configured timestamp field
    pub fn sort_spec(&self) -> SortSpec {
        SortSpec::descending(self.timestamp_field.clone())
    }
}
