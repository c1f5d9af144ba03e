//! Configuration management for the tiled streaming pipeline

use crate::grid::{GridError, GridSpec};
use crate::reassembler::ReassemblerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid grid: {0}")]
    Grid(#[from] GridError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete tilecast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tiling: TilingConfig,
}

/// Tiling pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilingConfig {
    /// Source frame width in pixels
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,

    /// Source frame height in pixels
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,

    /// Grid rows
    #[serde(default = "default_rows")]
    pub rows: u16,

    /// Grid columns
    #[serde(default = "default_cols")]
    pub cols: u16,

    /// Source frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Staleness timeout before an incomplete frame is flushed (ms)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Flush task poll interval (ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Tile buffers available to the crop stage
    #[serde(default = "default_tile_pool_size")]
    pub tile_pool_size: usize,

    /// Statistics reporting interval (seconds)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_seconds: u64,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            rows: default_rows(),
            cols: default_cols(),
            fps: default_fps(),
            flush_interval_ms: default_flush_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            tile_pool_size: default_tile_pool_size(),
            stats_interval_seconds: default_stats_interval(),
        }
    }
}

// Default value functions
fn default_frame_width() -> u32 {
    1920
}
fn default_frame_height() -> u32 {
    1080
}
fn default_rows() -> u16 {
    4
}
fn default_cols() -> u16 {
    4
}
fn default_fps() -> u32 {
    25
}
fn default_flush_interval_ms() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    30
}
fn default_tile_pool_size() -> usize {
    4
}
fn default_stats_interval() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tiling: TilingConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Loads configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Derives the grid spec; grid invariant violations are fatal here, at
    /// startup, rather than at runtime.
    pub fn grid(&self) -> Result<GridSpec, ConfigError> {
        Ok(GridSpec::new(
            self.tiling.frame_width,
            self.tiling.frame_height,
            self.tiling.rows,
            self.tiling.cols,
        )?)
    }

    /// Derives the reassembler configuration.
    pub fn reassembler(&self) -> Result<ReassemblerConfig, ConfigError> {
        Ok(ReassemblerConfig {
            grid: self.grid()?,
            flush_interval: Duration::from_millis(self.tiling.flush_interval_ms),
            poll_interval: Duration::from_millis(self.tiling.poll_interval_ms),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let cfg = &self.tiling;

        // Grid invariants (divisibility, tile count, chroma alignment)
        self.grid()?;

        if cfg.fps == 0 || cfg.fps > 120 {
            return Err(ConfigError::Invalid(format!(
                "fps must be between 1 and 120, got {}",
                cfg.fps
            )));
        }

        if cfg.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "flush_interval_ms must be > 0".to_string(),
            ));
        }

        if cfg.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }

        if cfg.tile_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "tile_pool_size must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
