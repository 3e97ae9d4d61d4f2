//! Source configuration.
//!
//! # Example Configuration
//!
//! ```toml
//! [source]
//! sample_rate = 40000000.0
//! block_samples = 200000
//! target_frame_rate = 200.0
//! bandwidth = 40000000
//! frequency = 100000000
//! amplifier = 0
//! attenuation = 10
//! if_gain = 20
//!
//! [source.retry]
//! spin_limit = 64
//! backoff = "100us"
//! ```

use serde::{Deserialize, Serialize};

use crate::device::Setpoints;
use crate::error::{Result, SourceError};
use crate::retry::RetryPolicy;

/// Frame rate the aggregation aims for.
pub const DEFAULT_FRAME_RATE: f64 = 200.0;

/// Configuration for one acquisition source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Fixed sample rate of the receiver model in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    /// Complex samples per device read (default: `sample_rate / 200`)
    #[serde(default)]
    pub block_samples: Option<usize>,

    /// Delivered frames per second the aggregation aims for
    #[serde(default = "default_frame_rate")]
    pub target_frame_rate: f64,

    /// Analog bandwidth pushed at start, in Hz
    #[serde(default = "default_bandwidth")]
    pub bandwidth: u64,

    /// Initial center frequency in Hz
    #[serde(default = "default_frequency")]
    pub frequency: u64,

    /// Initial external amplifier level
    #[serde(default)]
    pub amplifier: i32,

    /// Initial attenuation level
    #[serde(default)]
    pub attenuation: i32,

    /// Initial IF gain level
    #[serde(default)]
    pub if_gain: i32,

    /// Transient read miss handling
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_sample_rate() -> f64 {
    40_000_000.0
}

fn default_frame_rate() -> f64 {
    DEFAULT_FRAME_RATE
}

fn default_bandwidth() -> u64 {
    40_000_000
}

fn default_frequency() -> u64 {
    100_000_000
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_samples: None,
            target_frame_rate: default_frame_rate(),
            bandwidth: default_bandwidth(),
            frequency: default_frequency(),
            amplifier: 0,
            attenuation: 0,
            if_gain: 0,
            retry: RetryPolicy::default(),
        }
    }
}

impl SourceConfig {
    /// Parse a TOML table holding the source keys.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| SourceError::BadConfigValue {
            message: format!("Failed to parse source config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate.is_nan() || self.sample_rate <= 0.0 {
            return Err(SourceError::BadConfigValue {
                message: format!("Invalid sample rate: {}", self.sample_rate),
            });
        }

        if self.target_frame_rate.is_nan() || self.target_frame_rate <= 0.0 {
            return Err(SourceError::BadConfigValue {
                message: format!("Invalid target frame rate: {}", self.target_frame_rate),
            });
        }

        if self.block_samples() == 0 {
            return Err(SourceError::BadConfigValue {
                message: "Block size must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Complex samples per device read.
    pub fn block_samples(&self) -> usize {
        self.block_samples
            .unwrap_or((self.sample_rate / DEFAULT_FRAME_RATE) as usize)
    }

    /// Initial setpoints for a newly selected device (clamped on select).
    pub fn initial_setpoints(&self) -> Setpoints {
        Setpoints {
            frequency: self.frequency,
            amplifier: self.amplifier,
            attenuation: self.attenuation,
            if_gain: self.if_gain,
            bandwidth: self.bandwidth,
        }
    }
}
