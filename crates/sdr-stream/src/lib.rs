//! Frame handoff stream for continuous sample acquisition.
//!
//! This crate moves completed frames of complex samples from a producer
//! thread (the acquisition loop) to a consumer without per-frame heap
//! allocation. A fixed set of frame buffers is allocated when the stream is
//! created and circulates between the two sides:
//!
//! ```text
//! 1. frame_stream() pre-allocates `depth` buffers of `capacity` samples
//! 2. The writer fills its current buffer through write_buf()
//! 3. swap(n) hands the first n samples to the reader (ownership moves,
//!    no copy) and takes a free buffer for the next frame
//! 4. The reader receives a Frame; dropping it returns the buffer
//! 5. If no buffer is free, swap() blocks until the reader drops a frame
//! ```
//!
//! `swap` returns `false` when the reader has been dropped, or when the
//! writer-stop signal has been raised through a [`WriterStopHandle`]. Either
//! one tells the producer to leave its loop.
//!
//! # Example
//!
//! ```
//! use sdr_stream::frame_stream;
//!
//! let (mut writer, reader) = frame_stream(1024, 2);
//!
//! writer.write_buf()[..4].fill(num_complex::Complex32::new(0.5, -0.5));
//! assert!(writer.swap(4));
//!
//! let frame = reader.read().unwrap();
//! assert_eq!(frame.len(), 4);
//! assert_eq!(frame.sequence(), 0);
//! ```

pub mod frame;
pub mod stream;

pub use frame::Frame;
pub use stream::{frame_stream, StreamReader, StreamStats, StreamWriter, WriterStopHandle};

/// Default frame buffer capacity in complex samples.
pub const STREAM_BUFFER_SIZE: usize = 1_000_000;

/// Default number of frame buffers (double buffering).
pub const DEFAULT_DEPTH: usize = 2;
