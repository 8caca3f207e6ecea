//! Engine configuration.

use crate::error::{Error, Result};
use crate::grid::MAX_ZOOM;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by the query engine, the executor and the cell store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads used to scan cells.
    pub workers: usize,

    /// Capacity of the task and result channels.
    pub task_buffer: usize,

    /// Scan deadline in milliseconds; `None` scans until done.
    pub timeout_ms: Option<u64>,

    /// Finest zoom level searched for candidate cells.
    pub query_zoom: u32,

    /// Also search one ring of neighbouring cells.
    pub enlarge: bool,

    /// Emit only the inner rings of old-style multipolygons.
    pub old_style_multipolygons: bool,

    /// Parsed cells kept in memory (number of cells).
    pub cell_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            task_buffer: 64,
            timeout_ms: None,
            query_zoom: 14,
            enlarge: false,
            old_style_multipolygons: true,
            cell_cache_size: 1000,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.task_buffer == 0 {
            return Err(Error::Config("task_buffer must be at least 1".into()));
        }
        if self.query_zoom > MAX_ZOOM {
            return Err(Error::Config(format!(
                "query_zoom {} exceeds maximum {}",
                self.query_zoom, MAX_ZOOM
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
