//! Accumulation of raw samples across read cycles.

/// Pending raw samples waiting to be sliced into frames.
///
/// Samples are appended at the tail and complete frames are removed
/// from the head, so global sample order is preserved. After every
/// [`extract_complete_frames`](Self::extract_complete_frames) call the
/// buffer holds less than one frame.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: Vec<i16>,
    frame_len: usize,
    total_appended: u64,
}

impl SampleBuffer {
    /// Creates a buffer for frames of `frame_len` samples.
    ///
    /// `frame_len` comes from a validated geometry and is never zero.
    pub fn new(frame_len: usize) -> Self {
        Self {
            samples: Vec::with_capacity(frame_len.saturating_mul(2)),
            frame_len: frame_len.max(1),
            total_appended: 0,
        }
    }

    /// Appends a batch of samples. Growth is unbounded.
    pub fn append(&mut self, samples: &[i16]) {
        self.samples.extend_from_slice(samples);
        self.total_appended += samples.len() as u64;
    }

    /// Removes every complete frame from the head of the buffer.
    ///
    /// Returns `None` and leaves the buffer untouched when less than one
    /// frame is pending.
    pub fn extract_complete_frames(&mut self) -> Option<RawFrameBlock> {
        let frames = self.samples.len() / self.frame_len;
        if frames == 0 {
            return None;
        }

        let remainder = self.samples.split_off(frames * self.frame_len);
        let block = std::mem::replace(&mut self.samples, remainder);

        tracing::trace!(
            frames,
            remaining = self.samples.len(),
            "Extracted complete frames"
        );

        Some(RawFrameBlock {
            samples: block,
            frame_len: self.frame_len,
        })
    }

    /// Number of pending samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if no samples are pending.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples per frame this buffer slices on.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Total samples ever appended.
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    /// Drops all pending samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// A contiguous run of complete raw frames removed from a [`SampleBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrameBlock {
    samples: Vec<i16>,
    frame_len: usize,
}

impl RawFrameBlock {
    /// Number of frames in the block.
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.frame_len
    }

    /// Iterates over the frames in acquisition order.
    pub fn frames(&self) -> std::slice::ChunksExact<'_, i16> {
        self.samples.chunks_exact(self.frame_len)
    }

    /// All samples in the block.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }
}
