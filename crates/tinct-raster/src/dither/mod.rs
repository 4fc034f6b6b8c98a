//! Incremental, interruptible color-depth reduction.
//!
//! A [`Ditherer`] converts a rectangular window of 24-bit RGB pixels into
//! reduced-depth output one scanline per [`Ditherer::advance`] call, so a
//! large conversion can be interleaved with other event-loop work and
//! abandoned or resumed when the viewport changes mid-pass.
//!
//! Re-arming after an interruption widens the working region to the union
//! of the unfinished remainder and the newly requested rectangle, so no
//! area is ever silently dropped. Error-diffusion passes restart from
//! scratch instead of persisting partial error rows — the carried state is
//! cheap to recompute and a resume with stale error would visibly seam.

mod diffusion;
mod ordered;
mod tables;

use std::sync::Arc;
use std::time::Duration;

use tinct_protocol::Rect;

use crate::error::RasterError;
use diffusion::DiffusionState;
pub use tables::{ShadeCounts, ShadeTables};

/// Which per-pixel kernel a pass uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DitherAlgorithm {
    /// Deterministic positional thresholding; stateless across scanlines.
    Ordered,
    /// Floyd–Steinberg error diffusion; sequential across the whole pass.
    ErrorDiffusion,
}

/// Destination pixel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One palette index byte per pixel.
    Indexed8,
    /// Packed little-endian 15/16-bit value, two bytes per pixel.
    Packed16,
}

impl OutputFormat {
    fn bytes_per_pixel(&self) -> usize {
        match self {
            OutputFormat::Indexed8 => 1,
            OutputFormat::Packed16 => 2,
        }
    }
}

/// One dithering request against a destination surface.
#[derive(Debug, Clone, Copy)]
pub struct DitherRequest {
    pub algorithm: DitherAlgorithm,
    /// Requested region in destination coordinates.
    pub bounds: Rect,
    /// Cosmetic delay before the first scanline, so content about to be
    /// scrolled away is not dithered needlessly.
    pub initial_delay: Duration,
}

/// Incremental dither pass bound to one destination surface.
///
/// One instance lives per display surface that needs depth reduction; it is
/// re-armed (not recreated) for every new request so interrupted-region
/// bookkeeping carries across requests.
#[derive(Debug)]
pub struct Ditherer {
    tables: Arc<ShadeTables>,
    format: OutputFormat,
    /// Full destination surface extent; working bounds are clipped to it.
    extent: Rect,
    algorithm: DitherAlgorithm,
    /// Current working region.
    bounds: Rect,
    /// Scanlines of `bounds` completed so far.
    scanline: u32,
    done: bool,
    interrupted: bool,
    delay: Duration,
    diffusion: Option<DiffusionState>,
}

impl Ditherer {
    /// Create an idle ditherer for a destination surface.
    pub fn new(
        tables: Arc<ShadeTables>,
        format: OutputFormat,
        extent: Rect,
    ) -> Result<Self, RasterError> {
        let counts = tables.counts();
        match format {
            OutputFormat::Indexed8 => {
                if counts.total() > 256 {
                    return Err(RasterError::BadShadeCounts(format!(
                        "{} total shades exceed an 8-bit palette",
                        counts.total()
                    )));
                }
            }
            OutputFormat::Packed16 => {
                let pow2 = |n: u16| n.is_power_of_two();
                if !pow2(counts.r) || !pow2(counts.g) || !pow2(counts.b) {
                    return Err(RasterError::BadShadeCounts(
                        "packed output needs power-of-two shade counts".into(),
                    ));
                }
                let bits = counts.r.trailing_zeros()
                    + counts.g.trailing_zeros()
                    + counts.b.trailing_zeros();
                if bits > 16 {
                    return Err(RasterError::BadShadeCounts(format!(
                        "{bits} bits exceed a packed 16-bit pixel"
                    )));
                }
            }
        }
        Ok(Ditherer {
            tables,
            format,
            extent,
            algorithm: DitherAlgorithm::Ordered,
            bounds: Rect::new(0, 0, 0, 0),
            scanline: 0,
            done: true,
            interrupted: false,
            delay: Duration::ZERO,
            diffusion: None,
        })
    }

    pub fn done(&self) -> bool {
        self.done
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn scanline(&self) -> u32 {
        self.scanline
    }

    /// Scheduling delay before the first [`advance`](Self::advance) call.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Rows of the current pass not yet processed, or an empty rectangle.
    fn unfinished(&self) -> Rect {
        if self.scanline >= self.bounds.height {
            return Rect::new(0, 0, 0, 0);
        }
        Rect::new(
            self.bounds.x,
            self.bounds.y + self.scanline as i32,
            self.bounds.width,
            self.bounds.height - self.scanline,
        )
    }

    /// Mark the in-progress pass as interrupted. The next
    /// [`advance`](Self::advance) finishes it; the skipped area is folded
    /// into the next request's bounds.
    pub fn interrupt(&mut self) {
        if !self.done {
            self.interrupted = true;
        }
    }

    /// Arm a new pass.
    ///
    /// If the previous pass was cut short, the new working region is the
    /// bounding union of its unfinished remainder and `request.bounds`,
    /// clipped to the destination extent — never smaller than requested.
    pub fn arm(&mut self, request: DitherRequest) -> Result<(), RasterError> {
        let carried = self.unfinished();
        let widened = request.bounds.union(&carried);
        self.bounds = widened
            .intersect(&self.extent)
            .unwrap_or_else(|| Rect::new(0, 0, 0, 0));
        self.algorithm = request.algorithm;
        self.delay = request.initial_delay;
        self.scanline = 0;
        self.interrupted = false;
        self.done = self.bounds.is_empty();
        if !carried.is_empty() {
            log::debug!(
                "re-arm widened {:?} with carried {carried:?} -> {:?}",
                request.bounds,
                self.bounds
            );
        }
        self.diffusion = match (self.done, request.algorithm) {
            (false, DitherAlgorithm::ErrorDiffusion) => {
                Some(DiffusionState::new(self.bounds.width as usize)?)
            }
            _ => None,
        };
        Ok(())
    }

    /// Process one scanline.
    ///
    /// `src` holds RGB triples covering the destination extent with
    /// `src_stride` bytes per row; `dst` is the reduced-depth surface with
    /// `dst_stride` bytes per row. Returns `true` once the pass is done.
    /// A finished ditherer performs no work until re-armed.
    pub fn advance(
        &mut self,
        src: &[u8],
        src_stride: usize,
        dst: &mut [u8],
        dst_stride: usize,
    ) -> Result<bool, RasterError> {
        if self.done {
            return Ok(true);
        }

        if !self.interrupted {
            let y = self.bounds.y + self.scanline as i32;
            let width = self.bounds.width as usize;
            let src_off = (y - self.extent.y) as usize * src_stride
                + (self.bounds.x - self.extent.x) as usize * 3;
            let px = self.format.bytes_per_pixel();
            let dst_off = (y - self.extent.y) as usize * dst_stride
                + (self.bounds.x - self.extent.x) as usize * px;
            let src_row = &src[src_off..src_off + width * 3];
            let dst_row = &mut dst[dst_off..dst_off + width * px];

            match (self.algorithm, self.format) {
                (DitherAlgorithm::Ordered, OutputFormat::Indexed8) => {
                    ordered::scanline_indexed(&self.tables, src_row, dst_row, self.bounds.x, y, width);
                }
                (DitherAlgorithm::Ordered, OutputFormat::Packed16) => {
                    ordered::scanline_packed(&self.tables, src_row, dst_row, self.bounds.x, y, width);
                }
                (DitherAlgorithm::ErrorDiffusion, OutputFormat::Indexed8) => {
                    let state = self.diffusion.as_mut().ok_or(RasterError::Allocation {
                        bytes: (width + 2) * std::mem::size_of::<i32>(),
                    })?;
                    diffusion::scanline_indexed(&self.tables, state, src_row, dst_row, width);
                }
                (DitherAlgorithm::ErrorDiffusion, OutputFormat::Packed16) => {
                    let state = self.diffusion.as_mut().ok_or(RasterError::Allocation {
                        bytes: (width + 2) * std::mem::size_of::<i32>(),
                    })?;
                    diffusion::scanline_packed(&self.tables, state, src_row, dst_row, width);
                }
            }
            self.scanline += 1;
        }

        if self.interrupted || self.scanline >= self.bounds.height {
            self.done = true;
            // Carried diffusion error is discarded; an interrupted pass
            // restarts from its first scanline when re-armed.
            self.diffusion = None;
        }
        Ok(self.done)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
