//! Continuous acquisition loop.
//!
//! One [`Acquisition`] is one running session: a dedicated thread that
//! repeatedly
//!
//! 1. takes the device lock and reads one block (retrying transient misses
//!    per the [`RetryPolicy`]),
//! 2. releases the lock and converts the block into the next slot of the
//!    frame,
//! 3. hands the frame to the consumer once `blocks_per_frame` blocks have
//!    been converted.
//!
//! ```text
//!   ┌──────────────┐  read (locked)  ┌────────────┐  convert  ┌────────────┐  swap  ┌──────────┐
//!   │ SharedDevice │ ──────────────► │ raw block  │ ────────► │ Aggregator │ ─────► │ Consumer │
//!   └──────────────┘                 └────────────┘           └────────────┘        └──────────┘
//! ```
//!
//! # Stop latency
//!
//! Stopping clears the run flag and raises the stream's writer-stop signal,
//! then joins the thread. There is no preemption inside a device read: the
//! worst case is one in-flight `read` call plus one retry backoff. A `swap`
//! blocked on consumer backpressure is woken immediately by the writer-stop
//! signal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sdr_stream::{StreamWriter, WriterStopHandle};
use tracing::{debug, error, info, trace, warn};

use crate::aggregate::{Aggregator, FrameSizing};
use crate::device::SharedDevice;
use crate::error::{Result, SourceError};
use crate::retry::{read_block, ReadOutcome, RetryPolicy};

/// Lifecycle of the acquisition side of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No thread, device not started
    #[default]
    Idle,
    /// Loop thread spawned, device streaming
    Running,
    /// Loop thread has left its loop but has not been joined yet. `on_stop`
    /// joins before it returns, so a source reports this only after the
    /// thread exits on its own.
    Stopping,
}

/// Why the loop thread left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The run flag was cleared.
    Stopped,
    /// The consumer dropped its end of the stream.
    ConsumerClosed,
    /// Reads missed `misses` times in a row, past the policy limit.
    ReadStalled { misses: u64 },
}

impl ExitReason {
    /// The error equivalent, for reasons that are not a requested stop.
    pub fn as_error(&self) -> Option<SourceError> {
        match *self {
            Self::Stopped => None,
            Self::ConsumerClosed => Some(SourceError::ConsumerClosed),
            Self::ReadStalled { misses } => Some(SourceError::ReadStalled { misses }),
        }
    }
}

/// Statistics for one acquisition session.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionStats {
    /// Blocks read from the device
    pub blocks_read: u64,
    /// Frames handed to the consumer
    pub frames_delivered: u64,
    /// Complex samples handed to the consumer
    pub samples_delivered: u64,
    /// Transient read misses absorbed
    pub read_misses: u64,
    /// Time since the session started
    pub elapsed: Duration,
    /// Set once the loop thread has exited
    pub exit_reason: Option<ExitReason>,
}

impl AcquisitionStats {
    /// Achieved frame rate over the session.
    pub fn frame_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames_delivered as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Default)]
struct Counters {
    blocks_read: AtomicU64,
    frames_delivered: AtomicU64,
    samples_delivered: AtomicU64,
    read_misses: AtomicU64,
    exit_reason: Mutex<Option<ExitReason>>,
}

/// Everything the loop thread owns.
struct Worker {
    device: SharedDevice,
    aggregator: Aggregator,
    policy: RetryPolicy,
    run: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl Worker {
    fn run(mut self) -> StreamWriter {
        let sizing = self.aggregator.sizing();
        let mut raw = vec![0i16; sizing.raw_block_len()];

        debug!(
            block_samples = sizing.block_samples,
            blocks_per_frame = sizing.blocks_per_frame,
            "Acquisition thread running"
        );

        let reason = loop {
            if !self.run.load(Ordering::Acquire) {
                break ExitReason::Stopped;
            }

            let outcome = read_block(&self.device, &mut raw, &self.policy, &self.run);
            self.counters
                .read_misses
                .fetch_add(outcome.misses(), Ordering::Relaxed);
            match outcome {
                ReadOutcome::Filled { .. } => {}
                ReadOutcome::Stopped { .. } => break ExitReason::Stopped,
                ReadOutcome::Stalled { misses } => {
                    warn!(misses, "Device read stalled, leaving acquisition loop");
                    break ExitReason::ReadStalled { misses };
                }
            }
            self.counters.blocks_read.fetch_add(1, Ordering::Relaxed);

            self.aggregator.append(&raw);
            if !self.aggregator.is_full() {
                continue;
            }

            if !self.aggregator.take_frame() {
                if self.run.load(Ordering::Acquire) {
                    info!("Consumer closed, leaving acquisition loop");
                    break ExitReason::ConsumerClosed;
                }
                break ExitReason::Stopped;
            }

            let frames = self.counters.frames_delivered.fetch_add(1, Ordering::Relaxed) + 1;
            self.counters
                .samples_delivered
                .fetch_add(sizing.frame_samples() as u64, Ordering::Relaxed);
            trace!(frames, "Delivered frame");
        };

        *self.counters.exit_reason.lock() = Some(reason);
        debug!(?reason, "Acquisition thread exiting");
        self.aggregator.into_writer()
    }
}

/// Handles returned when a session ends.
pub struct AcquisitionReport {
    /// The stream writer, for the next session. `None` if the loop thread panicked.
    pub writer: Option<StreamWriter>,
    /// Final statistics
    pub stats: AcquisitionStats,
}

/// A running acquisition session.
pub struct Acquisition {
    device: SharedDevice,
    sizing: FrameSizing,
    run: Arc<AtomicBool>,
    counters: Arc<Counters>,
    stop_handle: WriterStopHandle,
    worker: Option<JoinHandle<StreamWriter>>,
    started_at: Instant,
}

impl Acquisition {
    /// Start the device and spawn the loop thread.
    ///
    /// Stored setpoints are pushed to the device before it starts streaming.
    pub fn start(
        device: SharedDevice,
        writer: StreamWriter,
        sizing: FrameSizing,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let aggregator = Aggregator::new(writer, sizing)?;
        let stop_handle = aggregator.stop_handle();
        stop_handle.clear_write_stop();

        let run = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());

        device.start_streaming();

        let worker = Worker {
            device: device.clone(),
            aggregator,
            policy,
            run: Arc::clone(&run),
            counters: Arc::clone(&counters),
        };
        let handle = thread::Builder::new()
            .name("kcsdr-acquisition".to_string())
            .spawn(move || worker.run());

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                device.stop_streaming();
                return Err(e.into());
            }
        };

        info!(
            serial = %device.descriptor().serial,
            block_samples = sizing.block_samples,
            blocks_per_frame = sizing.blocks_per_frame,
            "Started acquisition"
        );

        Ok(Self {
            device,
            sizing,
            run,
            counters,
            stop_handle,
            worker: Some(handle),
            started_at: Instant::now(),
        })
    }

    /// Frame sizing of this session.
    pub fn sizing(&self) -> FrameSizing {
        self.sizing
    }

    /// Whether the loop thread is still inside its loop.
    pub fn is_active(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Current statistics.
    pub fn stats(&self) -> AcquisitionStats {
        AcquisitionStats {
            blocks_read: self.counters.blocks_read.load(Ordering::Relaxed),
            frames_delivered: self.counters.frames_delivered.load(Ordering::Relaxed),
            samples_delivered: self.counters.samples_delivered.load(Ordering::Relaxed),
            read_misses: self.counters.read_misses.load(Ordering::Relaxed),
            elapsed: self.started_at.elapsed(),
            exit_reason: *self.counters.exit_reason.lock(),
        }
    }

    /// Clear the run flag, join the loop thread and stop the device.
    pub fn stop(mut self) -> AcquisitionReport {
        let writer = self.shutdown();
        let stats = self.stats();

        info!(
            blocks = stats.blocks_read,
            frames = stats.frames_delivered,
            misses = stats.read_misses,
            exit = ?stats.exit_reason,
            "Stopped acquisition"
        );

        AcquisitionReport { writer, stats }
    }

    fn shutdown(&mut self) -> Option<StreamWriter> {
        let handle = self.worker.take()?;

        self.run.store(false, Ordering::Release);
        self.stop_handle.stop_writer();

        let writer = match handle.join() {
            Ok(writer) => Some(writer),
            Err(e) => {
                error!("Acquisition thread panicked: {:?}", e);
                None
            }
        };

        self.device.stop_streaming();
        self.stop_handle.clear_write_stop();
        writer
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        if self.worker.is_some() {
            drop(self.shutdown());
        }
    }
}
