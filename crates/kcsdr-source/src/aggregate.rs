//! Frame sizing and block aggregation.
//!
//! The receiver delivers fixed-size blocks, usually far smaller than the
//! frame the downstream pipeline wants for a steady frame rate. The
//! [`Aggregator`] converts consecutive blocks straight into the stream's
//! write region and commits the frame once `blocks_per_frame` blocks have
//! landed, without resampling or an intermediate copy.

use sdr_stream::{StreamWriter, WriterStopHandle};
use tracing::debug;

use crate::convert::convert_block;
use crate::error::{Result, SourceError};

/// How many device blocks make one delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSizing {
    /// Complex samples per device read
    pub block_samples: usize,
    /// Device blocks per delivered frame, always >= 1
    pub blocks_per_frame: usize,
}

impl FrameSizing {
    /// Derive the sizing that best approaches `target_frame_rate` frames per
    /// second without exceeding `frame_capacity` samples per frame.
    ///
    /// `blocks_per_frame = floor(sample_rate / block_samples / target_frame_rate)`,
    /// clamped to `[1, frame_capacity / block_samples]`.
    pub fn compute(
        sample_rate: f64,
        block_samples: usize,
        target_frame_rate: f64,
        frame_capacity: usize,
    ) -> Result<Self> {
        if block_samples == 0 {
            return Err(SourceError::BadConfigValue {
                message: "Block size must be greater than 0".to_string(),
            });
        }
        if sample_rate.is_nan()
            || target_frame_rate.is_nan()
            || sample_rate <= 0.0
            || target_frame_rate <= 0.0
        {
            return Err(SourceError::BadConfigValue {
                message: format!(
                    "Invalid rates: sample_rate={}, target_frame_rate={}",
                    sample_rate, target_frame_rate
                ),
            });
        }
        if block_samples > frame_capacity {
            return Err(SourceError::BadConfigValue {
                message: format!(
                    "Block of {} samples does not fit a frame of {} samples",
                    block_samples, frame_capacity
                ),
            });
        }

        let wanted = (sample_rate / block_samples as f64 / target_frame_rate).floor();
        let max_blocks = frame_capacity / block_samples;
        let blocks_per_frame = if wanted < 1.0 {
            1
        } else {
            (wanted as usize).min(max_blocks)
        };

        debug!(
            block_samples,
            max_blocks,
            "Swapping will be done {} buffers at a time",
            blocks_per_frame
        );

        Ok(Self {
            block_samples,
            blocks_per_frame,
        })
    }

    /// Complex samples per delivered frame.
    pub fn frame_samples(&self) -> usize {
        self.block_samples * self.blocks_per_frame
    }

    /// Interleaved `i16` values per device read.
    pub fn raw_block_len(&self) -> usize {
        2 * self.block_samples
    }
}

/// Accumulates converted blocks in the stream's write region.
///
/// Owned exclusively by the acquisition thread.
pub struct Aggregator {
    writer: StreamWriter,
    sizing: FrameSizing,
    filled: usize,
}

impl Aggregator {
    /// Bind a sizing to a stream writer.
    ///
    /// Fails if a frame would not fit the writer's capacity.
    pub fn new(writer: StreamWriter, sizing: FrameSizing) -> Result<Self> {
        if sizing.blocks_per_frame == 0 || sizing.frame_samples() > writer.capacity() {
            return Err(SourceError::BadConfigValue {
                message: format!(
                    "Frame of {} samples exceeds stream capacity {}",
                    sizing.frame_samples(),
                    writer.capacity()
                ),
            });
        }

        Ok(Self {
            writer,
            sizing,
            filled: 0,
        })
    }

    /// Sizing this aggregator was built with.
    pub fn sizing(&self) -> FrameSizing {
        self.sizing
    }

    /// Blocks converted since the last handoff.
    pub fn blocks_filled(&self) -> usize {
        self.filled
    }

    /// Convert one raw block into the next free slot of the frame.
    ///
    /// # Panics
    ///
    /// Panics if the frame is already full; call
    /// [`take_frame`](Self::take_frame) first.
    pub fn append(&mut self, raw: &[i16]) {
        assert!(!self.is_full(), "append to a full frame");
        debug_assert_eq!(raw.len(), self.sizing.raw_block_len());

        let block = self.sizing.block_samples;
        let offset = self.filled * block;
        convert_block(raw, &mut self.writer.write_buf()[offset..offset + block]);
        self.filled += 1;
    }

    /// True once `blocks_per_frame` blocks have been appended.
    pub fn is_full(&self) -> bool {
        self.filled >= self.sizing.blocks_per_frame
    }

    /// Reset the block counter and hand the frame to the consumer.
    ///
    /// May block while the consumer applies backpressure. Returns `false` if
    /// the consumer is gone or the writer was stopped.
    pub fn take_frame(&mut self) -> bool {
        self.filled = 0;
        self.writer.swap(self.sizing.frame_samples())
    }

    /// Handle that wakes a `take_frame` blocked on backpressure.
    pub fn stop_handle(&self) -> WriterStopHandle {
        self.writer.stop_handle()
    }

    /// Give the writer back, discarding any partial frame.
    pub fn into_writer(self) -> StreamWriter {
        self.writer
    }
}
