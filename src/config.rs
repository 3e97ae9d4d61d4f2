//! Application configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/kcsdr.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `KCSDR_`, with `__` separating
//!    nested keys (`KCSDR_SOURCE__IF_GAIN=20`)
//!
//! Every key has a default, so an empty file or no file at all is valid.
//!
//! # Example
//! ```no_run
//! use kcsdr::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use kcsdr_source::SourceConfig;
use sdr_stream::{DEFAULT_DEPTH, STREAM_BUFFER_SIZE};
use serde::{Deserialize, Serialize};

use crate::tracing_init::{parse_log_level, OutputFormat};

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/kcsdr.toml";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Receiver and acquisition settings
    #[serde(default)]
    pub source: SourceConfig,
    /// Frame handoff stream settings
    #[serde(default)]
    pub stream: StreamSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Frame handoff stream configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Frame buffer capacity in complex samples
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Number of frame buffers in circulation (at least 2)
    #[serde(default = "default_depth")]
    pub depth: usize,
}

fn default_name() -> String {
    "kcsdr".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_capacity() -> usize {
    STREAM_BUFFER_SIZE
}

fn default_depth() -> usize {
    DEFAULT_DEPTH
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            depth: default_depth(),
        }
    }
}

impl StreamSettings {
    /// Check that a stream can be built from these settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("Stream capacity must be greater than 0".to_string());
        }
        if self.depth < 2 {
            return Err(format!(
                "Invalid stream depth {}. Must be at least 2",
                self.depth
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from `config/kcsdr.toml` and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    /// The provider stack, exposed for callers that merge more sources.
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("KCSDR_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        parse_log_level(&self.application.log_level)?;

        self.source.validate().map_err(|e| e.to_string())?;
        self.stream.validate()?;

        if self.source.block_samples() > self.stream.capacity {
            return Err(format!(
                "Block of {} samples does not fit a stream buffer of {} samples",
                self.source.block_samples(),
                self.stream.capacity
            ));
        }

        Ok(())
    }
}
