//! Reconstructed frame types.

use chrono::{DateTime, Utc};

/// Row-major grid of averaged pixel values.
///
/// This is the pure output of reconstruction: identical raw input and
/// geometry always produce an identical grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    pixels: Vec<i16>,
    width: usize,
    height: usize,
    empty_windows: usize,
}

impl PixelGrid {
    pub(crate) fn new(pixels: Vec<i16>, width: usize, height: usize, empty_windows: usize) -> Self {
        Self {
            pixels,
            width,
            height,
            empty_windows,
        }
    }

    /// Returns the pixel data in row-major order.
    #[inline]
    pub fn pixels(&self) -> &[i16] {
        &self.pixels
    }

    /// Pixels per line.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Lines in the grid.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Returns one row of pixels, or `None` past the last line.
    pub fn row(&self, line: usize) -> Option<&[i16]> {
        if line >= self.height {
            return None;
        }
        let start = line * self.width;
        self.pixels.get(start..start + self.width)
    }

    /// Returns the pixel at `(line, column)`.
    pub fn get(&self, line: usize, column: usize) -> Option<i16> {
        if column >= self.width {
            return None;
        }
        self.row(line).and_then(|r| r.get(column).copied())
    }

    /// Iterates over the rows from top to bottom.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, i16> {
        self.pixels.chunks_exact(self.width.max(1))
    }

    /// Pixels whose averaging window held no valid samples.
    #[inline]
    pub fn empty_windows(&self) -> usize {
        self.empty_windows
    }

    /// Consumes the grid, returning the pixel buffer.
    pub fn into_pixels(self) -> Vec<i16> {
        self.pixels
    }
}

/// A single reconstructed frame handed to consumers.
///
/// Single channel, 16-bit signed depth, `height` lines of `width` pixels.
/// The frame owns its pixel buffer; when it is shared between
/// subscribers the buffer is freed once the last reference is dropped.
#[derive(Clone)]
pub struct ReconstructedFrame {
    grid: PixelGrid,
    /// Monotonic sequence number within the acquisition session.
    sequence: u64,
    /// Time the read that completed this frame returned.
    acquired_at: DateTime<Utc>,
}

impl ReconstructedFrame {
    /// Number of image channels.
    pub const CHANNELS: usize = 1;
    /// Bit depth of each pixel.
    pub const DEPTH_BITS: usize = 16;

    /// Wraps a grid, stamping it with the current time.
    pub fn new(grid: PixelGrid, sequence: u64) -> Self {
        Self::with_timestamp(grid, sequence, Utc::now())
    }

    /// Wraps a grid whose samples finished arriving at `acquired_at`.
    pub fn with_timestamp(grid: PixelGrid, sequence: u64, acquired_at: DateTime<Utc>) -> Self {
        Self {
            grid,
            sequence,
            acquired_at,
        }
    }

    /// Returns the reconstructed pixel grid.
    #[inline]
    pub fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    /// Returns the pixel data in row-major order.
    #[inline]
    pub fn pixels(&self) -> &[i16] {
        self.grid.pixels()
    }

    /// Pixels per line.
    #[inline]
    pub fn width(&self) -> usize {
        self.grid.width()
    }

    /// Lines per frame.
    #[inline]
    pub fn height(&self) -> usize {
        self.grid.height()
    }

    /// Returns the sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Time the device read completing this frame returned.
    #[inline]
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Pixels filled under the empty-window policy.
    #[inline]
    pub fn empty_windows(&self) -> usize {
        self.grid.empty_windows()
    }

    /// Returns the total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.grid.width() * self.grid.height()
    }

    /// Validates that the pixel buffer size matches dimensions.
    pub fn is_valid(&self) -> bool {
        self.grid.pixels().len() == self.pixel_count()
    }

    /// Mean pixel value, or `None` for an empty frame.
    pub fn mean(&self) -> Option<f64> {
        let pixels = self.grid.pixels();
        if pixels.is_empty() {
            return None;
        }
        let sum: i64 = pixels.iter().map(|&p| i64::from(p)).sum();
        Some(sum as f64 / pixels.len() as f64)
    }

    /// Consumes the frame, returning the pixel buffer.
    pub fn into_pixels(self) -> Vec<i16> {
        self.grid.into_pixels()
    }
}

impl std::fmt::Debug for ReconstructedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconstructedFrame")
            .field("width", &self.grid.width())
            .field("height", &self.grid.height())
            .field("sequence", &self.sequence)
            .field("acquired_at", &self.acquired_at)
            .field("empty_windows", &self.grid.empty_windows())
            .finish()
    }
}
