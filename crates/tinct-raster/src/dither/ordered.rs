//! Ordered (positional threshold) dither kernel.
//!
//! Stateless across scanlines: each channel is mapped through its shade
//! bracket table and the low/high level is picked by comparing the 8×8
//! threshold tile cell at `(y & 7, x & 7)` against the bracket's threshold
//! index. The same input pixel at the same position always produces the
//! same output, which keeps repeated partial redraws flicker-free.

use super::tables::{ChannelTable, ShadeTables, DITHER_TILE};

#[inline]
fn level(table: &ChannelTable, value: u8, cell: u8) -> u32 {
    let (low, threshold) = table.bracket[value as usize];
    if cell < threshold {
        low as u32 + 1
    } else {
        low as u32
    }
}

/// Dither one scanline of RGB triples into palette indices.
///
/// `x0`/`y` are the absolute destination coordinates of the first pixel,
/// which anchor the threshold tile.
pub(crate) fn scanline_indexed(
    tables: &ShadeTables,
    src: &[u8],
    dst: &mut [u8],
    x0: i32,
    y: i32,
    width: usize,
) {
    let tile_row = &DITHER_TILE[(y & 7) as usize];
    for i in 0..width {
        let cell = tile_row[((x0 + i as i32) & 7) as usize];
        let r = level(&tables.red, src[i * 3], cell);
        let g = level(&tables.green, src[i * 3 + 1], cell);
        let b = level(&tables.blue, src[i * 3 + 2], cell);
        dst[i] = (r * tables.red_mult + g * tables.green_mult + b) as u8;
    }
}

/// Dither one scanline of RGB triples into packed little-endian 15/16-bit
/// values (2 bytes per destination pixel).
pub(crate) fn scanline_packed(
    tables: &ShadeTables,
    src: &[u8],
    dst: &mut [u8],
    x0: i32,
    y: i32,
    width: usize,
) {
    let counts = tables.counts();
    let b_bits = counts.b.trailing_zeros();
    let g_bits = counts.g.trailing_zeros();
    let tile_row = &DITHER_TILE[(y & 7) as usize];
    for i in 0..width {
        let cell = tile_row[((x0 + i as i32) & 7) as usize];
        let r = level(&tables.red, src[i * 3], cell);
        let g = level(&tables.green, src[i * 3 + 1], cell);
        let b = level(&tables.blue, src[i * 3 + 2], cell);
        let packed = ((r << (g_bits + b_bits)) | (g << b_bits) | b) as u16;
        dst[i * 2..i * 2 + 2].copy_from_slice(&packed.to_le_bytes());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
