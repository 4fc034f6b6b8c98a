//! Error types for the image store and dither engine.

/// Errors that can occur during image store or dither operations.
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    /// The image id was not found in the store.
    #[error("image not found: {0}")]
    UnknownImage(u32),

    /// Invalid image or region dimensions.
    #[error("invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// A buffer allocation failed.
    #[error("allocation of {bytes} bytes failed")]
    Allocation { bytes: usize },

    /// Write access was requested but no shadow buffer exists.
    #[error("image {0} has no shadow buffer")]
    NoShadow(u32),

    /// A coordinate fell outside the image.
    #[error("coordinate ({x}, {y}) out of bounds")]
    OutOfBounds { x: u32, y: u32 },

    /// Shade counts that cannot address the output format.
    #[error("unusable shade counts: {0}")]
    BadShadeCounts(String),
}

/// Allocate a zeroed byte buffer, surfacing failure instead of aborting.
pub(crate) fn try_zeroed(len: usize) -> Result<Vec<u8>, RasterError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| RasterError::Allocation { bytes: len })?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Allocate a zeroed `i32` row, surfacing failure instead of aborting.
pub(crate) fn try_zeroed_i32(len: usize) -> Result<Vec<i32>, RasterError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| RasterError::Allocation {
        bytes: len * std::mem::size_of::<i32>(),
    })?;
    buf.resize(len, 0);
    Ok(buf)
}
