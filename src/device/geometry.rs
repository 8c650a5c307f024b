//! Frame geometry reported by the device.

use super::DeviceError;
use serde::{Deserialize, Serialize};

/// Sample layout of one raster frame.
///
/// Queried once after connecting and fixed for the lifetime of the
/// acquisition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    /// Raw samples averaged into one pixel.
    pub samples_per_pixel: usize,
    /// Pixels in one scan line.
    pub pixels_per_line: usize,
    /// Scan lines in one frame.
    pub lines_per_frame: usize,
}

impl FrameGeometry {
    /// Creates a geometry, rejecting zero-sized dimensions.
    pub fn new(
        samples_per_pixel: usize,
        pixels_per_line: usize,
        lines_per_frame: usize,
    ) -> Result<Self, DeviceError> {
        let geometry = Self {
            samples_per_pixel,
            pixels_per_line,
            lines_per_frame,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Checks that every dimension is positive and the frame size fits in memory.
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.samples_per_pixel == 0 || self.pixels_per_line == 0 || self.lines_per_frame == 0
        {
            return Err(DeviceError::InvalidGeometry(format!(
                "all dimensions must be positive, got {}x{}x{}",
                self.samples_per_pixel, self.pixels_per_line, self.lines_per_frame
            )));
        }
        self.samples_per_pixel
            .checked_mul(self.pixels_per_line)
            .and_then(|n| n.checked_mul(self.lines_per_frame))
            .ok_or_else(|| DeviceError::InvalidGeometry("frame size overflows".into()))?;
        Ok(())
    }

    /// Number of raw samples that make up one complete frame.
    #[inline]
    pub fn total_samples_per_frame(&self) -> usize {
        self.samples_per_pixel * self.pixels_per_line * self.lines_per_frame
    }

    /// Number of output pixels in one frame.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.pixels_per_line * self.lines_per_frame
    }
}

impl std::fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} px, {} samples/px",
            self.pixels_per_line, self.lines_per_frame, self.samples_per_pixel
        )
    }
}
