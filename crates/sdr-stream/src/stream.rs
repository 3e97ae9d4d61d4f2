//! Writer and reader halves of the frame stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use num_complex::Complex32;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace};

use crate::frame::Frame;

/// Buffers and flags protected by the stream lock.
struct StreamState {
    /// Buffers available to the writer
    free: Vec<Vec<Complex32>>,
    /// Committed frames waiting for the reader, oldest first
    ready: VecDeque<(Vec<Complex32>, u64)>,
    /// Reader half has been dropped
    reader_closed: bool,
    /// Writer half has been dropped
    writer_closed: bool,
    /// Writer-stop signal raised through a `WriterStopHandle`
    write_stopped: bool,
}

/// Shared state between writer, reader, frames and stop handles.
pub(crate) struct StreamInner {
    state: Mutex<StreamState>,
    /// Signalled when a frame is committed or the writer closes
    frame_ready: Condvar,
    /// Signalled when a buffer is recycled, the reader closes or the writer is stopped
    buffer_free: Condvar,
    capacity: usize,
    depth: usize,
    frames_committed: AtomicU64,
    samples_committed: AtomicU64,
    frames_recycled: AtomicU64,
}

impl StreamInner {
    /// Return a consumed buffer to the free list.
    pub(crate) fn recycle(&self, mut buffer: Vec<Complex32>) {
        // Restore the full write region; capacity is retained so this never allocates.
        buffer.resize(self.capacity, Complex32::default());

        let mut state = self.state.lock();
        state.free.push(buffer);
        drop(state);

        self.frames_recycled.fetch_add(1, Ordering::Relaxed);
        self.buffer_free.notify_one();
    }
}

/// Create a frame stream with `depth` buffers of `capacity` samples each.
///
/// The writer owns one buffer at all times, so `depth - 1` frames can be in
/// flight before [`StreamWriter::swap`] starts to block.
///
/// # Panics
///
/// Panics if `capacity` is 0 or `depth` is less than 2.
#[must_use]
pub fn frame_stream(capacity: usize, depth: usize) -> (StreamWriter, StreamReader) {
    assert!(capacity > 0, "capacity must be > 0");
    assert!(depth >= 2, "depth must be >= 2");

    let mut free: Vec<Vec<Complex32>> = (0..depth)
        .map(|_| vec![Complex32::default(); capacity])
        .collect();
    let current = free.pop().unwrap_or_default();

    info!(
        capacity,
        depth,
        total_mb = (capacity * depth * std::mem::size_of::<Complex32>()) as f64 / (1024.0 * 1024.0),
        "Frame stream created"
    );

    let inner = Arc::new(StreamInner {
        state: Mutex::new(StreamState {
            free,
            ready: VecDeque::with_capacity(depth),
            reader_closed: false,
            writer_closed: false,
            write_stopped: false,
        }),
        frame_ready: Condvar::new(),
        buffer_free: Condvar::new(),
        capacity,
        depth,
        frames_committed: AtomicU64::new(0),
        samples_committed: AtomicU64::new(0),
        frames_recycled: AtomicU64::new(0),
    });

    let writer = StreamWriter {
        inner: Arc::clone(&inner),
        current,
        sequence: 0,
    };
    let reader = StreamReader { inner };

    (writer, reader)
}

/// Snapshot of stream counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Frames handed to the reader
    pub frames_committed: u64,
    /// Samples handed to the reader
    pub samples_committed: u64,
    /// Frames returned to the free list by the consumer
    pub frames_recycled: u64,
    /// Frames committed but not yet read
    pub frames_pending: usize,
    /// Buffers currently free for the writer
    pub free_buffers: usize,
}

fn stats_of(inner: &StreamInner) -> StreamStats {
    let state = inner.state.lock();
    StreamStats {
        frames_committed: inner.frames_committed.load(Ordering::Relaxed),
        samples_committed: inner.samples_committed.load(Ordering::Relaxed),
        frames_recycled: inner.frames_recycled.load(Ordering::Relaxed),
        frames_pending: state.ready.len(),
        free_buffers: state.free.len(),
    }
}

/// Producer half of the stream.
///
/// Owned by exactly one thread. The write region returned by
/// [`write_buf`](Self::write_buf) always spans the full frame capacity.
pub struct StreamWriter {
    inner: Arc<StreamInner>,
    current: Vec<Complex32>,
    sequence: u64,
}

impl StreamWriter {
    /// The frame-sized write region for the next commit.
    pub fn write_buf(&mut self) -> &mut [Complex32] {
        &mut self.current
    }

    /// Frame capacity in samples.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of frame buffers in the stream.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    /// Hand the first `count` samples of the write region to the reader.
    ///
    /// Blocks while every buffer is held by the reader side. Returns `false`
    /// without committing if the reader has been dropped or the writer-stop
    /// signal is raised; the write region is kept in that case.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the frame capacity.
    pub fn swap(&mut self, count: usize) -> bool {
        assert!(
            count <= self.inner.capacity,
            "swap({}) exceeds frame capacity ({})",
            count,
            self.inner.capacity
        );

        let mut state = self.inner.state.lock();
        let next = loop {
            if state.reader_closed || state.write_stopped {
                return false;
            }
            if let Some(buffer) = state.free.pop() {
                break buffer;
            }
            self.inner.buffer_free.wait(&mut state);
        };

        let mut committed = std::mem::replace(&mut self.current, next);
        committed.truncate(count);
        let sequence = self.sequence;
        state.ready.push_back((committed, sequence));
        drop(state);

        self.sequence += 1;
        self.inner.frames_committed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .samples_committed
            .fetch_add(count as u64, Ordering::Relaxed);
        self.inner.frame_ready.notify_one();

        trace!(sequence, count, "Committed frame");
        true
    }

    /// Handle that can interrupt a blocked [`swap`](Self::swap) from another thread.
    #[must_use]
    pub fn stop_handle(&self) -> WriterStopHandle {
        WriterStopHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Whether the reader half is still alive.
    #[must_use]
    pub fn is_reader_open(&self) -> bool {
        !self.inner.state.lock().reader_closed
    }

    /// Current stream counters.
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        stats_of(&self.inner)
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        self.inner.state.lock().writer_closed = true;
        self.inner.frame_ready.notify_all();
        debug!("Stream writer closed");
    }
}

/// Raises or clears the writer-stop signal.
#[derive(Clone)]
pub struct WriterStopHandle {
    inner: Arc<StreamInner>,
}

impl WriterStopHandle {
    /// Make every current and future `swap` return `false`.
    pub fn stop_writer(&self) {
        self.inner.state.lock().write_stopped = true;
        self.inner.buffer_free.notify_all();
    }

    /// Clear the writer-stop signal so the writer can be reused.
    pub fn clear_write_stop(&self) {
        self.inner.state.lock().write_stopped = false;
    }

    /// Whether the writer-stop signal is raised.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().write_stopped
    }
}

/// Consumer half of the stream.
///
/// Dropping the reader closes the stream: pending frames are discarded and
/// the writer's next `swap` returns `false`.
pub struct StreamReader {
    inner: Arc<StreamInner>,
}

impl StreamReader {
    /// Block until a frame is available.
    ///
    /// Returns `None` once the writer has been dropped and every committed
    /// frame has been read.
    pub fn read(&self) -> Option<Frame> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some((samples, sequence)) = state.ready.pop_front() {
                return Some(Frame::new(samples, sequence, Arc::clone(&self.inner)));
            }
            if state.writer_closed {
                return None;
            }
            self.inner.frame_ready.wait(&mut state);
        }
    }

    /// Wait up to `timeout` for a frame.
    pub fn read_timeout(&self, timeout: Duration) -> Option<Frame> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some((samples, sequence)) = state.ready.pop_front() {
                return Some(Frame::new(samples, sequence, Arc::clone(&self.inner)));
            }
            if state.writer_closed {
                return None;
            }
            if self
                .inner
                .frame_ready
                .wait_for(&mut state, timeout)
                .timed_out()
            {
                return state
                    .ready
                    .pop_front()
                    .map(|(samples, sequence)| Frame::new(samples, sequence, Arc::clone(&self.inner)));
            }
        }
    }

    /// Take a frame if one is already committed.
    pub fn try_read(&self) -> Option<Frame> {
        self.inner
            .state
            .lock()
            .ready
            .pop_front()
            .map(|(samples, sequence)| Frame::new(samples, sequence, Arc::clone(&self.inner)))
    }

    /// Frame capacity in samples.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Whether the writer half is still alive.
    #[must_use]
    pub fn is_writer_open(&self) -> bool {
        !self.inner.state.lock().writer_closed
    }

    /// Current stream counters.
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        stats_of(&self.inner)
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.reader_closed = true;
        let capacity = self.inner.capacity;
        while let Some((mut buffer, _)) = state.ready.pop_front() {
            buffer.resize(capacity, Complex32::default());
            state.free.push(buffer);
        }
        drop(state);

        self.inner.buffer_free.notify_all();
        debug!("Stream reader closed");
    }
}
