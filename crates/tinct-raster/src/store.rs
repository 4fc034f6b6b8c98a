//! Image storage and lifecycle management.
//!
//! The [`ImageStore`] is the host-side store the plug-in channel layer
//! resolves handles against. Each image owns its base pixel buffer and,
//! while a plug-in holds write access, a copy-on-write shadow buffer that is
//! merged back through the current selection on `IMAGE_UPDATE`.

use std::collections::HashMap;

use tinct_protocol::{PixelKind, Rect};

use crate::error::{try_zeroed, RasterError};

/// Largest dimension accepted for a single axis.
const MAX_DIMENSION: u32 = 65_536;

/// A floating selection buffer: pixels hovering over the base image until
/// anchored.
#[derive(Debug, Clone)]
pub struct FloatingBuffer {
    pub bounds: Rect,
    /// Pixel rows in the image's own channel layout, `bounds.width` wide.
    pub pixels: Vec<u8>,
}

/// One stored image.
#[derive(Debug)]
pub struct Image {
    id: u32,
    pub name: String,
    width: u32,
    height: u32,
    kind: PixelKind,
    pixels: Vec<u8>,
    shadow: Option<Vec<u8>>,
    floating: Option<FloatingBuffer>,
    selection: Option<Rect>,
    colormap: Option<Vec<[u8; 3]>>,
    dirty: bool,
    busy: bool,
    file_path: bool,
}

impl Image {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn kind(&self) -> PixelKind {
        self.kind
    }

    pub fn channels(&self) -> u32 {
        self.kind.channels()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    /// True when `name` is a real filesystem path rather than a display
    /// title.
    pub fn is_file_path(&self) -> bool {
        self.file_path
    }

    pub fn set_file_path(&mut self, file_path: bool) {
        self.file_path = file_path;
    }

    pub fn has_shadow(&self) -> bool {
        self.shadow.is_some()
    }

    pub fn has_floating(&self) -> bool {
        self.floating.is_some()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn shadow_mut(&mut self) -> Result<&mut [u8], RasterError> {
        self.shadow
            .as_deref_mut()
            .ok_or(RasterError::NoShadow(self.id))
    }

    pub fn colormap(&self) -> Option<&[[u8; 3]]> {
        self.colormap.as_deref()
    }

    pub fn set_colormap(&mut self, colormap: Vec<[u8; 3]>) {
        self.colormap = Some(colormap);
    }

    pub fn selection(&self) -> Option<Rect> {
        self.selection
    }

    pub fn set_selection(&mut self, selection: Option<Rect>) {
        self.selection = selection;
    }

    /// Full extent of the image as a rectangle at the origin.
    pub fn extent(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// The current selection's bounds clipped to the image, or the full
    /// image when nothing is selected (or the selection is entirely
    /// off-canvas).
    pub fn selection_bounds(&self) -> Rect {
        match self.selection {
            Some(sel) => sel.intersect(&self.extent()).unwrap_or_else(|| self.extent()),
            None => self.extent(),
        }
    }

    fn row_bytes(&self) -> usize {
        self.width as usize * self.channels() as usize
    }

    /// Color at a pixel, resolved through the colormap for indexed images
    /// and replicated for grayscale.
    pub fn pixel_rgb(&self, x: u32, y: u32) -> Result<[u8; 3], RasterError> {
        if x >= self.width || y >= self.height {
            return Err(RasterError::OutOfBounds { x, y });
        }
        let offset = y as usize * self.row_bytes() + x as usize * self.channels() as usize;
        match self.kind {
            PixelKind::Rgb => Ok([
                self.pixels[offset],
                self.pixels[offset + 1],
                self.pixels[offset + 2],
            ]),
            PixelKind::Gray => {
                let v = self.pixels[offset];
                Ok([v, v, v])
            }
            PixelKind::Indexed => {
                let index = self.pixels[offset] as usize;
                let entry = self
                    .colormap
                    .as_ref()
                    .and_then(|map| map.get(index))
                    .copied()
                    .unwrap_or([0, 0, 0]);
                Ok(entry)
            }
        }
    }

    /// Composite the floating buffer down into the base pixels.
    ///
    /// Opaque copy clipped to the image; the plug-in fetching read access
    /// sees final pixels afterwards.
    pub fn anchor_floating(&mut self) -> Option<Rect> {
        let floating = self.floating.take()?;
        let clipped = floating.bounds.intersect(&self.extent())?;
        let channels = self.channels() as usize;
        let src_stride = floating.bounds.width as usize * channels;
        let dst_stride = self.row_bytes();
        for row in 0..clipped.height as usize {
            let src_y = (clipped.y - floating.bounds.y) as usize + row;
            let src_x = (clipped.x - floating.bounds.x) as usize;
            let src_off = src_y * src_stride + src_x * channels;
            let dst_off = (clipped.y as usize + row) * dst_stride + clipped.x as usize * channels;
            let len = clipped.width as usize * channels;
            self.pixels[dst_off..dst_off + len]
                .copy_from_slice(&floating.pixels[src_off..src_off + len]);
        }
        self.dirty = true;
        Some(clipped)
    }

    pub fn set_floating(&mut self, floating: FloatingBuffer) {
        self.floating = Some(floating);
    }
}

/// Handle-keyed image store.
///
/// Ids are positive and assigned monotonically, skipping 0; the plug-in
/// protocol's signed handles map onto these ids with the sign carrying the
/// access mode.
#[derive(Debug, Default)]
pub struct ImageStore {
    images: HashMap<u32, Image>,
    next_id: u32,
}

impl ImageStore {
    pub fn new() -> Self {
        ImageStore {
            images: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Create a new zeroed image and return its id.
    pub fn create(
        &mut self,
        width: u32,
        height: u32,
        kind: PixelKind,
        name: impl Into<String>,
    ) -> Result<u32, RasterError> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            log::warn!("rejecting image creation: {width}x{height}");
            return Err(RasterError::InvalidDimensions { width, height });
        }
        let len = width as usize * height as usize * kind.channels() as usize;
        let pixels = try_zeroed(len)?;

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1; // skip 0
        }

        log::debug!("created image {id}: {width}x{height} {kind:?}");
        self.images.insert(
            id,
            Image {
                id,
                name: name.into(),
                width,
                height,
                kind,
                pixels,
                shadow: None,
                floating: None,
                selection: None,
                colormap: match kind {
                    PixelKind::Indexed => Some(Vec::new()),
                    _ => None,
                },
                dirty: true,
                busy: false,
                file_path: false,
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: u32) -> Result<&Image, RasterError> {
        self.images.get(&id).ok_or(RasterError::UnknownImage(id))
    }

    pub fn get_mut(&mut self, id: u32) -> Result<&mut Image, RasterError> {
        self.images
            .get_mut(&id)
            .ok_or(RasterError::UnknownImage(id))
    }

    pub fn has(&self, id: u32) -> bool {
        self.images.contains_key(&id)
    }

    pub fn delete(&mut self, id: u32) -> Result<(), RasterError> {
        self.images
            .remove(&id)
            .map(|_| ())
            .ok_or(RasterError::UnknownImage(id))
    }

    pub fn mark_dirty(&mut self, id: u32) -> Result<(), RasterError> {
        self.get_mut(id)?.dirty = true;
        Ok(())
    }

    pub fn clear_dirty(&mut self, id: u32) -> Result<(), RasterError> {
        self.get_mut(id)?.dirty = false;
        Ok(())
    }

    /// Allocate the copy-on-write shadow buffer for write-mode plug-in
    /// access. Idempotent while a shadow already exists.
    pub fn allocate_shadow(&mut self, id: u32) -> Result<(), RasterError> {
        let image = self.get_mut(id)?;
        if image.shadow.is_some() {
            return Ok(());
        }
        let mut shadow = Vec::new();
        shadow
            .try_reserve_exact(image.pixels.len())
            .map_err(|_| RasterError::Allocation {
                bytes: image.pixels.len(),
            })?;
        shadow.extend_from_slice(&image.pixels);
        image.shadow = Some(shadow);
        Ok(())
    }

    /// Drop the shadow buffer without merging.
    pub fn free_shadow(&mut self, id: u32) -> Result<(), RasterError> {
        self.get_mut(id)?.shadow = None;
        Ok(())
    }

    /// Merge the shadow buffer back into the base pixels through the
    /// current selection's bounds. Returns the merged region.
    pub fn merge_shadow(&mut self, id: u32) -> Result<Rect, RasterError> {
        let image = self.get_mut(id)?;
        let shadow = image.shadow.as_ref().ok_or(RasterError::NoShadow(id))?;
        let region = image.selection_bounds();
        let channels = image.kind.channels() as usize;
        let stride = image.width as usize * channels;
        for row in 0..region.height as usize {
            let off =
                (region.y as usize + row) * stride + region.x as usize * channels;
            let len = region.width as usize * channels;
            image.pixels[off..off + len].copy_from_slice(&shadow[off..off + len]);
        }
        image.dirty = true;
        Ok(region)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
