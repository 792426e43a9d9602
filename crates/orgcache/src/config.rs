//! Cache configuration

use std::fs;
use std::path::Path;

use orgstore::{Error, Result};
use serde::{Deserialize, Serialize};

/// Knobs for both cache tiers and batch resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries in the cross-session tier
    pub capacity: usize,
    /// Cross-session tier enabled
    pub shared: bool,
    /// Session tier enabled
    pub session: bool,
    /// Maximum foreign keys per batched store call
    pub batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            shared: true,
            session: true,
            batch_size: 500,
        }
    }
}

impl CacheConfig {
    /// Defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cross-session tier capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Enable or disable the cross-session tier
    pub fn with_shared(mut self, enabled: bool) -> Self {
        self.shared = enabled;
        self
    }

    /// Enable or disable the session tier
    pub fn with_session(mut self, enabled: bool) -> Self {
        self.session = enabled;
        self
    }

    /// Set the batch size for batched resolution
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Reject zero capacity or batch size
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::invalid("cache capacity must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(Error::invalid("batch size must be at least 1"));
        }
        Ok(())
    }

    /// Parse and validate a JSON document; missing fields take defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(text)
            .map_err(|err| Error::Parse(format!("cache config: {}", err)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
