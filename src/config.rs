//! Engine configuration, loadable from TOML.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Tunables for a [`Session`](crate::assembler::Session).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lifetime of cached maps and summaries, in milliseconds.
    pub cache_ttl_ms: u64,
    /// Domain cells merged per slice before yielding.
    pub chunk_size: usize,
    /// Lower bound of the intensity normalization ceiling.
    pub min_intensity_ceiling: f64,
    /// Largest bounding-box domain that will be materialized.
    pub max_domain_cells: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 30 * 60 * 1000,
            chunk_size: 1000,
            min_intensity_ceiling: 0.1,
            max_domain_cells: 4_000_000,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}
