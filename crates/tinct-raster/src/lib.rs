//! Image storage and incremental color-depth reduction for the tinct host.
//!
//! Two loosely coupled pieces live here:
//!
//! - [`ImageStore`] — the handle-keyed image store the plug-in channel layer
//!   drives: base pixel buffers, copy-on-write shadow buffers for write-mode
//!   plug-in access, floating selection buffers, and selection bounds.
//! - [`Ditherer`] — an interruptible, one-scanline-per-call reducer from
//!   24-bit RGB down to an indexed palette or a packed 15/16-bit value,
//!   using ordered (position-thresholded) or Floyd–Steinberg
//!   error-diffusion dithering.
//!
//! Allocation failures surface as [`RasterError::Allocation`] instead of
//! aborting, leaving destination buffers in their last fully rendered state.

pub mod dither;
pub mod error;
pub mod store;

pub use dither::{DitherAlgorithm, DitherRequest, Ditherer, OutputFormat, ShadeCounts, ShadeTables};
pub use error::RasterError;
pub use store::{FloatingBuffer, Image, ImageStore};
