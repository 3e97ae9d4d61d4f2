//! Continuous acquisition source for KC908-class SDR receivers.
//!
//! This crate reads fixed-size blocks of interleaved 16-bit I/Q samples from
//! a receiver on a dedicated thread, converts them to normalized
//! [`Complex32`](num_complex::Complex32) samples, aggregates several blocks
//! into one frame and hands each completed frame to the downstream pipeline
//! through an [`sdr_stream`] writer.
//!
//! # Architecture
//!
//! ## Device Access
//! - [`ReceiverDriver`] / [`ReceiverDevice`] - Hardware backend contract
//! - [`SharedDevice`] - Selected unit plus setpoints behind one mutex
//! - [`DeviceDescriptor`] / [`GainRange`] - Identity and capability ranges
//!
//! ## Acquisition
//! - [`convert_block`] - Fixed-point to normalized float conversion
//! - [`FrameSizing`] / [`Aggregator`] - Blocks-per-frame and frame assembly
//! - [`RetryPolicy`] - Handling of transient "no data yet" reads
//! - [`Acquisition`] - The loop thread and its session state
//!
//! ## Control Surface
//! - [`KcsdrSource`] - Selection, setpoints, tuning
//! - [`SourceHandler`] - Lifecycle hooks for the host
//! - [`SourceHost`] - Notifications from the source to the host
//!
//! ## Testing
//! - [`mock::MockDriver`] / [`mock::MockReceiver`] - Simulated receivers
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use kcsdr_source::mock::{MockConfig, MockDriver};
//! use kcsdr_source::{KcsdrSource, NullHost, SourceConfig, SourceHandler};
//! use sdr_stream::frame_stream;
//!
//! # fn example() -> kcsdr_source::Result<()> {
//! let driver = Arc::new(MockDriver::single("KC0001", MockConfig::default()));
//! let config = SourceConfig {
//!     block_samples: Some(2_000),
//!     ..Default::default()
//! };
//! let mut source = KcsdrSource::new("kc908", driver, Arc::new(NullHost), config)?;
//!
//! let (writer, reader) = frame_stream(200_000, 2);
//! source.set_stream(writer)?;
//! source.on_tune(100.0e6)?;
//! source.on_start()?;
//!
//! let frame = reader.read_timeout(Duration::from_secs(5)).unwrap();
//! assert_eq!(frame.len(), 200_000);
//!
//! source.on_stop()?;
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod acquisition;
pub mod aggregate;
pub mod config;
pub mod convert;
pub mod device;
pub mod error;
pub mod mock;
pub mod retry;
pub mod source;

pub use acquisition::{Acquisition, AcquisitionReport, AcquisitionStats, ExitReason, SessionState};
pub use aggregate::{Aggregator, FrameSizing};
pub use config::SourceConfig;
pub use convert::{convert_block, to_fixed, FULL_SCALE};
pub use device::{
    DeviceDescriptor, DeviceId, GainRange, ReceiverDevice, ReceiverDriver, Setpoints, SharedDevice,
};
pub use error::{Result, SourceError};
pub use retry::{read_block, ReadOutcome, RetryPolicy};
pub use source::{KcsdrSource, NullHost, SourceHandler, SourceHost};
