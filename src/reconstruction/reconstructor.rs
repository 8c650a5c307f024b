//! Pixel averaging and bidirectional scan correction.
//!
//! A bidirectional raster scanner captures every other line in reverse
//! spatial order. Reconstruction averages each pixel's sample window,
//! discarding negative sentinel samples, and mirrors odd rows so that
//! columns line up across the frame.

use super::PixelGrid;
use crate::device::FrameGeometry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while reconstructing a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconstructionError {
    /// The raw slice is not exactly one frame long.
    #[error("raw frame has {actual} samples, expected {expected}")]
    SliceLength {
        /// Samples in one frame for the session geometry.
        expected: usize,
        /// Samples actually supplied.
        actual: usize,
    },
    /// The row addressing would read past the end of a frame.
    #[error("row addressing reaches sample {required} but a frame holds only {available}")]
    AddressingOutOfBounds {
        /// Samples the last line's windows would reach.
        required: usize,
        /// Samples in one frame.
        available: usize,
    },
    /// A pixel window held only sentinel samples under the `Fail` policy.
    #[error("no valid samples for pixel at line {line}, column {column}")]
    EmptyWindow {
        /// Scan line of the pixel.
        line: usize,
        /// Column in scan order, before any row flip.
        column: usize,
    },
}

/// Stride used to locate the start of each line in the raw slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowAddressing {
    /// Line `i` starts at `i * lines_per_frame * samples_per_pixel`.
    ///
    /// Matches the acquisition software the instrument ships with. Only
    /// equivalent to [`PixelsPerLine`](Self::PixelsPerLine) on square frames.
    #[default]
    Reference,
    /// Line `i` starts at `i * pixels_per_line * samples_per_pixel`.
    PixelsPerLine,
}

/// What to emit for a pixel whose window holds only sentinel samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyWindowPolicy {
    /// Emit the given value and keep going.
    Sentinel(i16),
    /// Fail the frame.
    Fail,
}

impl Default for EmptyWindowPolicy {
    fn default() -> Self {
        Self::Sentinel(0)
    }
}

/// Reconstruction settings.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// How line start offsets are computed.
    pub row_addressing: RowAddressing,
    /// What to emit for pixels without valid samples.
    pub empty_window: EmptyWindowPolicy,
}

/// Converts frame-sized raw sample slices into pixel grids.
///
/// Bound to one session's geometry; construction rejects geometries the
/// selected row addressing cannot read within a single frame.
#[derive(Debug, Clone)]
pub struct FrameReconstructor {
    geometry: FrameGeometry,
    config: ReconstructionConfig,
    row_stride: usize,
}

impl FrameReconstructor {
    /// Builds a reconstructor, rejecting geometries whose row addressing
    /// would read past the end of a frame slice.
    pub fn new(
        geometry: FrameGeometry,
        config: ReconstructionConfig,
    ) -> Result<Self, ReconstructionError> {
        let row_stride = match config.row_addressing {
            RowAddressing::Reference => geometry.lines_per_frame,
            RowAddressing::PixelsPerLine => geometry.pixels_per_line,
        };

        let available = geometry.total_samples_per_frame();
        let required = (geometry.lines_per_frame - 1)
            .checked_mul(row_stride)
            .and_then(|n| n.checked_add(geometry.pixels_per_line))
            .and_then(|n| n.checked_mul(geometry.samples_per_pixel))
            .unwrap_or(usize::MAX);
        if required > available {
            return Err(ReconstructionError::AddressingOutOfBounds {
                required,
                available,
            });
        }

        Ok(Self {
            geometry,
            config,
            row_stride,
        })
    }

    /// Returns the geometry this reconstructor was built for.
    pub fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    /// Reconstructs one frame from exactly `total_samples_per_frame` samples.
    pub fn reconstruct(&self, raw: &[i16]) -> Result<PixelGrid, ReconstructionError> {
        let expected = self.geometry.total_samples_per_frame();
        if raw.len() != expected {
            return Err(ReconstructionError::SliceLength {
                expected,
                actual: raw.len(),
            });
        }

        let spp = self.geometry.samples_per_pixel;
        let width = self.geometry.pixels_per_line;
        let height = self.geometry.lines_per_frame;
        let mut pixels = vec![0i16; width * height];
        let mut empty_windows = 0;

        for (line, row) in pixels.chunks_exact_mut(width).enumerate() {
            // Odd lines were scanned right to left
            let flipped = line % 2 == 1;
            let line_start = line * self.row_stride * spp;

            for column in 0..width {
                let start = line_start + column * spp;
                let value = match average_valid(&raw[start..start + spp]) {
                    Some(value) => value,
                    None => {
                        empty_windows += 1;
                        match self.config.empty_window {
                            EmptyWindowPolicy::Sentinel(value) => value,
                            EmptyWindowPolicy::Fail => {
                                return Err(ReconstructionError::EmptyWindow { line, column })
                            }
                        }
                    }
                };

                let target = if flipped { width - 1 - column } else { column };
                row[target] = value;
            }
        }

        if empty_windows > 0 {
            tracing::debug!(empty_windows, "Frame contained pixels without valid samples");
        }

        Ok(PixelGrid::new(pixels, width, height, empty_windows))
    }
}

/// Truncating mean of the non-negative samples, `None` if there are none.
fn average_valid(window: &[i16]) -> Option<i16> {
    let (sum, count) = window
        .iter()
        .filter(|&&s| s >= 0)
        .fold((0i64, 0i64), |(sum, count), &s| (sum + i64::from(s), count + 1));

    if count == 0 {
        return None;
    }
    // Mean of values in 0..=i16::MAX always fits
    Some((sum / count) as i16)
}
