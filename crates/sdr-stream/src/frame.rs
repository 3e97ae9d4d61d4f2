//! Completed frames handed to the consumer.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use num_complex::Complex32;

use crate::stream::StreamInner;

/// A completed frame owned by the consumer.
///
/// Dereferences to the committed samples. When dropped, the underlying
/// buffer goes back to the stream's free list and a writer blocked in
/// [`StreamWriter::swap`](crate::StreamWriter::swap) is woken.
pub struct Frame {
    samples: Option<Vec<Complex32>>,
    sequence: u64,
    inner: Arc<StreamInner>,
}

impl Frame {
    pub(crate) fn new(samples: Vec<Complex32>, sequence: u64, inner: Arc<StreamInner>) -> Self {
        Self {
            samples: Some(samples),
            sequence,
            inner,
        }
    }

    /// Position of this frame in the stream, starting at 0.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The committed samples.
    #[must_use]
    pub fn samples(&self) -> &[Complex32] {
        self.samples.as_deref().unwrap_or(&[])
    }
}

impl Deref for Frame {
    type Target = [Complex32];

    fn deref(&self) -> &Self::Target {
        self.samples()
    }
}

impl AsRef<[Complex32]> for Frame {
    fn as_ref(&self) -> &[Complex32] {
        self.samples()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("len", &self.samples().len())
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(buffer) = self.samples.take() {
            self.inner.recycle(buffer);
        }
    }
}
