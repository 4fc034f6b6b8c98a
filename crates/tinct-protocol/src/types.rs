//! Core domain types: handles, pixel kinds, rectangles, and dialog values.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Handle types
// ---------------------------------------------------------------------------

/// Identifier for one open plug-in channel within a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

/// Signed image handle exchanged with plug-ins.
///
/// The sign encodes the access mode: positive handles grant read access to
/// the base pixel buffer, negative handles grant write access through a
/// copy-on-write shadow buffer that is merged back on `IMAGE_UPDATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageHandle(pub i32);

impl ImageHandle {
    /// A read-mode handle for the store id `id`.
    pub fn read(id: u32) -> Self {
        ImageHandle(id as i32)
    }

    /// A write-mode (shadow buffer) handle for the store id `id`.
    pub fn write(id: u32) -> Self {
        ImageHandle(-(id as i32))
    }

    /// The underlying store id, independent of access mode.
    pub fn id(&self) -> u32 {
        self.0.unsigned_abs()
    }

    /// True when this handle addresses the shadow buffer.
    pub fn is_write(&self) -> bool {
        self.0 < 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemHandle(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DialogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Pixel kinds
// ---------------------------------------------------------------------------

/// Pixel storage kind for an image.
///
/// Exactly three kinds exist. There is no wildcard "all kinds" value; a
/// plug-in requesting one fails to decode and is treated as a protocol
/// violation by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelKind {
    /// 3 channels, 8 bits each.
    Rgb,
    /// 1 grayscale channel.
    Gray,
    /// 1 palette-index channel plus a colormap.
    Indexed,
}

impl PixelKind {
    /// Number of pixel channels for this kind.
    pub fn channels(&self) -> u32 {
        match self {
            PixelKind::Rgb => 3,
            PixelKind::Gray | PixelKind::Indexed => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Rectangles
// ---------------------------------------------------------------------------

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Bounding union of two rectangles. An empty rectangle is the identity.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect {
            x,
            y,
            width: (right - x as i64) as u32,
            height: (bottom - y as i64) as u32,
        }
    }

    /// Intersection clipped to both rectangles, or `None` when disjoint.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x as i64 || bottom <= y as i64 {
            return None;
        }
        Some(Rect {
            x,
            y,
            width: (right - x as i64) as u32,
            height: (bottom - y as i64) as u32,
        })
    }
}

// ---------------------------------------------------------------------------
// Dialog item types
// ---------------------------------------------------------------------------

/// Kind tag for a proxied dialog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Button,
    Toggle,
    Slider,
    TextField,
    Label,
    Frame,
    Group,
}

/// Typed value carried by a dialog item.
///
/// The variant is sized to the item's actual type rather than a fixed
/// opaque block, so values survive serialization without truncation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemValue {
    None,
    Bool(bool),
    Int(i64),
    Text(String),
    Scale(f64),
}

impl Default for ItemValue {
    fn default() -> Self {
        ItemValue::None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_handle_sign_convention() {
        let read = ImageHandle::read(42);
        let write = ImageHandle::write(42);
        assert_eq!(read.id(), 42);
        assert_eq!(write.id(), 42);
        assert!(!read.is_write());
        assert!(write.is_write());
    }

    #[test]
    fn pixel_kind_channels() {
        assert_eq!(PixelKind::Rgb.channels(), 3);
        assert_eq!(PixelKind::Gray.channels(), 1);
        assert_eq!(PixelKind::Indexed.channels(), 1);
    }

    #[test]
    fn pixel_kind_rejects_wildcard() {
        let parsed: Result<PixelKind, _> = serde_json::from_str("\"all\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn rect_union_bounding() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 20, 10, 5);
        let u = a.union(&b);
        assert_eq!(u, Rect::new(0, 0, 15, 25));
    }

    #[test]
    fn rect_union_with_empty_is_identity() {
        let a = Rect::new(3, 4, 8, 8);
        let empty = Rect::new(100, 100, 0, 0);
        assert_eq!(a.union(&empty), a);
        assert_eq!(empty.union(&a), a);
    }

    #[test]
    fn rect_intersect_clips() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.intersect(&b), Some(Rect::new(5, 5, 5, 5)));
        let far = Rect::new(50, 50, 5, 5);
        assert_eq!(a.intersect(&far), None);
    }

    #[test]
    fn item_value_serde() {
        let v = ItemValue::Scale(0.5);
        let json = serde_json::to_string(&v).unwrap();
        let parsed: ItemValue = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, v);
    }
}
