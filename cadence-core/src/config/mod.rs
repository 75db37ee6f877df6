//! Topology configuration loading and validation.
//!
//! One YAML file describes everything `Topology::configure` needs.  Every
//! section is optional; missing sections and fields fall back to defaults.
//!
//! ```yaml
//! rate_groups:
//!   divisors: [1, 2, 4]
//!   dispatch: inline        # inline | active
//!   overrun_policy: drop    # drop | queue | halt
//!   queue_depth: 2
//! clock:
//!   period_ms: 1000         # 0 → ticks are delivered externally
//! buffer_pool:
//!   bins:
//!     - { size: 64,   count: 16 }
//!     - { size: 1024, count: 8 }
//! framing:
//!   start_word: 0xDEADBEEF
//!   max_payload: 1000
//!   checksum: crc32         # crc32 | fletcher16
//! link:
//!   uart_number: 0
//!   baud: 115200
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::buffer::{validate_bins, BinSpec, PoolError};
use crate::comm::LinkParams;
use crate::framing::{CodecConfig, FrameCodec, FramingError};
use crate::scheduler::{SchedulerConfig, SchedulerError};

// ── Errors ────────────────────────────────────────────────────────────────────

/// A configuration that can never produce a working topology.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("rate_groups: {0}")]
    RateGroups(#[from] SchedulerError),

    #[error("buffer_pool: {0}")]
    BufferPool(#[from] PoolError),

    #[error("framing: {0}")]
    Framing(#[from] FramingError),

    /// The largest bin cannot hold a maximum-size frame.
    #[error("framing: a {max_payload}-byte payload needs a {needed}-byte buffer, largest bin is {largest}")]
    PayloadExceedsBins {
        max_payload: usize,
        needed: usize,
        largest: usize,
    },

    #[error("link: baud must be > 0")]
    ZeroBaud,
}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Base tick period.  `0` disables the internal clock driver.
    pub period_ms: u64,
}

impl ClockConfig {
    pub fn period(&self) -> Option<Duration> {
        (self.period_ms > 0).then(|| Duration::from_millis(self.period_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub bins: Vec<BinSpec>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            bins: vec![
                BinSpec::new(64, 16),
                BinSpec::new(1024, 8),
                BinSpec::new(8192, 2),
            ],
        }
    }
}

/// Complete topology configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub rate_groups: SchedulerConfig,
    pub clock: ClockConfig,
    pub buffer_pool: PoolConfig,
    pub framing: CodecConfig,
    pub link: LinkParams,
}

impl TopologyConfig {
    /// Parse and validate `path`.
    ///
    /// # Errors
    /// The file cannot be read, the YAML is malformed, or validation fails.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading topology configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;
        let config = Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))?;

        info!(
            divisors = ?config.rate_groups.divisors,
            dispatch = ?config.rate_groups.dispatch,
            overrun_policy = ?config.rate_groups.overrun_policy,
            period_ms = config.clock.period_ms,
            bins = config.buffer_pool.bins.len(),
            max_payload = config.framing.max_payload,
            baud = config.link.baud,
            "Topology configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("Failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section.  Returns on the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let hyperperiod = self.rate_groups.validate()?;
        let total_bytes = validate_bins(&self.buffer_pool.bins)?;
        let codec = FrameCodec::new(self.framing)?;

        let largest = self
            .buffer_pool
            .bins
            .iter()
            .map(|b| b.size)
            .max()
            .unwrap_or(0);
        let needed = codec.frame_len(codec.max_payload());
        if needed > largest {
            return Err(ConfigError::PayloadExceedsBins {
                max_payload: codec.max_payload(),
                needed,
                largest,
            });
        }

        if self.link.baud == 0 {
            return Err(ConfigError::ZeroBaud);
        }

        debug!(hyperperiod, total_bytes, largest, "configuration validated");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
