//! Floyd–Steinberg error-diffusion kernel.
//!
//! Carries two rolling rows of accumulated quantization error per channel,
//! each `width + 2` wide so the first and last pixels have one cell of
//! context on each side. The residual split is 7/16 right, 3/16 below-left,
//! 5/16 below, and whatever remains below-right, so the redistributed parts
//! always sum exactly to the residual. Unlike the ordered kernel this
//! depends on left-to-right, top-to-bottom order and cannot be resumed from
//! a partial row.

use super::tables::{ChannelTable, ShadeTables};
use crate::error::{try_zeroed_i32, RasterError};

/// Rolling error rows for one in-progress diffusion pass.
#[derive(Debug)]
pub(crate) struct DiffusionState {
    /// Error being corrected into the current row, one `width + 2` row per
    /// channel.
    current: [Vec<i32>; 3],
    /// Error accumulating for the next row.
    next: [Vec<i32>; 3],
}

impl DiffusionState {
    pub fn new(width: usize) -> Result<Self, RasterError> {
        let row = || try_zeroed_i32(width + 2);
        Ok(DiffusionState {
            current: [row()?, row()?, row()?],
            next: [row()?, row()?, row()?],
        })
    }

    /// Swap the roles of the rows after a finished scanline; the new "next"
    /// row starts empty.
    fn roll(&mut self) {
        for c in 0..3 {
            std::mem::swap(&mut self.current[c], &mut self.next[c]);
            self.next[c].fill(0);
        }
    }
}

/// Split a residual into the four Floyd–Steinberg parts.
///
/// The below-right part is computed as the remainder so the four parts sum
/// exactly to `residual` for every representable magnitude.
#[inline]
pub(crate) fn split_error(residual: i32) -> (i32, i32, i32, i32) {
    let right = residual * 7 / 16;
    let below_left = residual * 3 / 16;
    let below = residual * 5 / 16;
    let below_right = residual - right - below_left - below;
    (right, below_left, below, below_right)
}

#[inline]
fn quantize(
    tables: &ShadeTables,
    table: &ChannelTable,
    raw: u8,
    carried: i32,
) -> (u32, i32) {
    let corrected = tables.clamp(raw as i32 + carried) as i32;
    let level = table.quant[corrected as usize];
    let residual = corrected - table.levels[level as usize] as i32;
    (level as u32, residual)
}

#[inline]
fn diffuse(state: &mut DiffusionState, channel: usize, i: usize, residual: i32) {
    let (right, below_left, below, below_right) = split_error(residual);
    state.current[channel][i + 2] += right;
    state.next[channel][i] += below_left;
    state.next[channel][i + 1] += below;
    state.next[channel][i + 2] += below_right;
}

/// Diffuse one scanline of RGB triples into palette indices.
pub(crate) fn scanline_indexed(
    tables: &ShadeTables,
    state: &mut DiffusionState,
    src: &[u8],
    dst: &mut [u8],
    width: usize,
) {
    for i in 0..width {
        let mut index = 0u32;
        for (c, table) in [&tables.red, &tables.green, &tables.blue]
            .into_iter()
            .enumerate()
        {
            let carried = state.current[c][i + 1];
            let (level, residual) = quantize(tables, table, src[i * 3 + c], carried);
            diffuse(state, c, i, residual);
            index += match c {
                0 => level * tables.red_mult,
                1 => level * tables.green_mult,
                _ => level,
            };
        }
        dst[i] = index as u8;
    }
    state.roll();
}

/// Diffuse one scanline of RGB triples into packed little-endian 15/16-bit
/// values (2 bytes per destination pixel).
pub(crate) fn scanline_packed(
    tables: &ShadeTables,
    state: &mut DiffusionState,
    src: &[u8],
    dst: &mut [u8],
    width: usize,
) {
    let counts = tables.counts();
    let b_bits = counts.b.trailing_zeros();
    let g_bits = counts.g.trailing_zeros();
    for i in 0..width {
        let mut levels = [0u32; 3];
        for (c, table) in [&tables.red, &tables.green, &tables.blue]
            .into_iter()
            .enumerate()
        {
            let carried = state.current[c][i + 1];
            let (level, residual) = quantize(tables, table, src[i * 3 + c], carried);
            diffuse(state, c, i, residual);
            levels[c] = level;
        }
        let packed =
            ((levels[0] << (g_bits + b_bits)) | (levels[1] << b_bits) | levels[2]) as u16;
        dst[i * 2..i * 2 + 2].copy_from_slice(&packed.to_le_bytes());
    }
    state.roll();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
