//! KC908 SDR acquisition application.
//!
//! Application glue around the [`kcsdr_source`] and [`sdr_stream`] crates:
//! - [`config`] - Figment-based configuration (`config/kcsdr.toml` + `KCSDR_` env)
//! - [`tracing_init`] - Subscriber setup with pretty, compact and JSON output
//! - [`capture`] - Drive one source for a number of frames and summarise them

pub mod capture;
pub mod config;
pub mod tracing_init;

pub use kcsdr_source;
pub use sdr_stream;
