//! Precomputed conversion tables for the dither kernels.
//!
//! All per-pixel math is table lookups over integer values; the tables are
//! built once per display when the shade counts become known, never per
//! pixel.

use crate::error::RasterError;

/// 8×8 ordered-dither threshold tile, values `0..64`, indexed
/// `(y & 7, x & 7)`.
pub const DITHER_TILE: [[u8; 8]; 8] = [
    [0, 32, 8, 40, 2, 34, 10, 42],
    [48, 16, 56, 24, 50, 18, 58, 26],
    [12, 44, 4, 36, 14, 46, 6, 38],
    [60, 28, 52, 20, 62, 30, 54, 22],
    [3, 35, 11, 43, 1, 33, 9, 41],
    [51, 19, 59, 27, 49, 17, 57, 25],
    [15, 47, 7, 39, 13, 45, 5, 37],
    [63, 31, 55, 23, 61, 29, 53, 21],
];

/// Number of output intensity levels available per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadeCounts {
    pub r: u16,
    pub g: u16,
    pub b: u16,
}

impl ShadeCounts {
    /// Total number of addressable output colors.
    pub fn total(&self) -> u32 {
        self.r as u32 * self.g as u32 * self.b as u32
    }
}

/// Per-channel lookup tables.
#[derive(Debug)]
pub(crate) struct ChannelTable {
    /// Reconstructed intensity for each level.
    pub levels: Vec<u8>,
    /// For each 8-bit input: (low level, threshold index in `0..64`).
    /// The tile cell being below the threshold index picks the high level.
    pub bracket: Vec<(u8, u8)>,
    /// For each 8-bit input: the nearest level (for error diffusion).
    pub quant: Vec<u8>,
}

impl ChannelTable {
    fn new(shades: u16) -> Result<Self, RasterError> {
        if !(2..=256).contains(&shades) {
            return Err(RasterError::BadShadeCounts(format!(
                "per-channel shade count must be in 2..=256, got {shades}"
            )));
        }
        let n = shades as u32;
        let mut levels = Vec::with_capacity(n as usize);
        for i in 0..n {
            levels.push((i * 255 / (n - 1)) as u8);
        }

        let mut bracket = Vec::with_capacity(256);
        let mut quant = Vec::with_capacity(256);
        for v in 0u32..256 {
            let scaled = v * (n - 1);
            let low = scaled / 255;
            let rem = scaled % 255;
            // Position within the bracket mapped onto the tile's 0..64 range.
            let threshold = (rem * 64 / 255) as u8;
            bracket.push((low as u8, threshold));
            quant.push(((scaled + 127) / 255) as u8);
        }

        Ok(ChannelTable {
            levels,
            bracket,
            quant,
        })
    }
}

/// Shade tables for one display's channel geometry.
#[derive(Debug)]
pub struct ShadeTables {
    pub(crate) counts: ShadeCounts,
    pub(crate) red: ChannelTable,
    pub(crate) green: ChannelTable,
    pub(crate) blue: ChannelTable,
    /// Additive palette-index contribution per red/green level; blue
    /// contributes its level directly.
    pub(crate) red_mult: u32,
    pub(crate) green_mult: u32,
    /// Clamp table covering the bounded error overflow range
    /// `-256..512`, indexed by `value + 256`.
    clamp: Vec<u8>,
}

impl ShadeTables {
    pub fn new(counts: ShadeCounts) -> Result<Self, RasterError> {
        let red = ChannelTable::new(counts.r)?;
        let green = ChannelTable::new(counts.g)?;
        let blue = ChannelTable::new(counts.b)?;

        let mut clamp = Vec::with_capacity(768);
        for i in 0..768i32 {
            clamp.push((i - 256).clamp(0, 255) as u8);
        }

        Ok(ShadeTables {
            counts,
            red,
            green,
            blue,
            red_mult: counts.g as u32 * counts.b as u32,
            green_mult: counts.b as u32,
            clamp,
        })
    }

    pub fn counts(&self) -> ShadeCounts {
        self.counts
    }

    /// Branch-free clamp of a corrected channel value.
    ///
    /// Carried diffusion error never exceeds one quantization step (≤ 128),
    /// so `value` stays within the table's `-256..512` coverage.
    #[inline]
    pub(crate) fn clamp(&self, value: i32) -> u8 {
        self.clamp[(value + 256) as usize]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
