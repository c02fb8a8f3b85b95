//! TOML configuration parsing.
//!
//! All tunables (worker count, page size, timeouts, render geometry) live
//! here and are passed explicitly into the components that need them.
//! The binary runs fine without a config file; every field has a default.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub getmap: GetMapConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HarvestConfig {
    /// Fixed size of the page-job worker pool.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Requested CSW page size. The catalogue may return fewer records
    /// per page; the probe discovers the effective size.
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        HarvestConfig {
            workers: default_workers(),
            page_size: default_page_size(),
        }
    }
}

fn default_workers() -> usize {
    10
}
fn default_page_size() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Timeout for CSW GetRecords calls, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub csw_timeout_secs: u64,
    /// Timeout for WMS GetCapabilities calls, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub wms_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            csw_timeout_secs: default_timeout_secs(),
            wms_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GetMapConfig {
    /// Timeout for sample GetMap calls, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_map_px")]
    pub width: u32,
    #[serde(default = "default_map_px")]
    pub height: u32,
    /// Requested raster format. Lossless formats keep the color count
    /// check meaningful.
    #[serde(default = "default_map_format")]
    pub format: String,
}

impl Default for GetMapConfig {
    fn default() -> Self {
        GetMapConfig {
            timeout_secs: default_timeout_secs(),
            width: default_map_px(),
            height: default_map_px(),
            format: default_map_format(),
        }
    }
}

fn default_map_px() -> u32 {
    400
}
fn default_map_format() -> String {
    "image/png".to_string()
}

impl HttpConfig {
    pub fn csw_timeout(&self) -> Duration {
        Duration::from_secs(self.csw_timeout_secs)
    }

    pub fn wms_timeout(&self) -> Duration {
        Duration::from_secs(self.wms_timeout_secs)
    }
}

impl GetMapConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.harvest.workers == 0 {
        anyhow::bail!("harvest.workers must be > 0");
    }
    if config.harvest.page_size == 0 {
        anyhow::bail!("harvest.page_size must be > 0");
    }
    if config.getmap.width == 0 || config.getmap.height == 0 {
        anyhow::bail!("getmap.width and getmap.height must be > 0");
    }
    if config.http.csw_timeout_secs == 0 || config.http.wms_timeout_secs == 0 {
        anyhow::bail!("http timeouts must be > 0 seconds");
    }

    Ok(config)
}
