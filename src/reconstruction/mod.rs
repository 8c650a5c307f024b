//! Sample buffering and frame reconstruction.
//!
//! Raw samples arrive in driver-sized chunks with no frame boundaries.
//! [`SampleBuffer`] slices them into frame-sized blocks and
//! [`FrameReconstructor`] turns each block into a pixel grid.

mod buffer;
mod frame;
mod reconstructor;

pub use buffer::{RawFrameBlock, SampleBuffer};
pub use frame::{PixelGrid, ReconstructedFrame};
pub use reconstructor::{
    EmptyWindowPolicy, FrameReconstructor, ReconstructionConfig, ReconstructionError,
    RowAddressing,
};
