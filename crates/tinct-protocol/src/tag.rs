//! Wire tag constants for the top-level message kinds.
//!
//! Tags are `i32` on the wire. The host only ever *sends* [`LOAD`] and
//! [`SAVE`]; receiving either is a protocol violation.

pub const QUIT: i32 = 0;
pub const IMAGE_NEW: i32 = 1;
pub const IMAGE_DISPLAY: i32 = 2;
/// Fetch image data for read access (positive handle, base buffer).
pub const IMAGE_GET_READ: i32 = 3;
/// Fetch image data for write access (negative handle, shadow buffer).
pub const IMAGE_GET_WRITE: i32 = 4;
pub const IMAGE_COLOR: i32 = 5;
pub const IMAGE_UPDATE: i32 = 6;
pub const LOAD: i32 = 7;
pub const SAVE: i32 = 8;
pub const PARAMS: i32 = 9;
pub const PROGRESS: i32 = 10;
pub const USER_MESSAGE: i32 = 11;
pub const DIALOG: i32 = 12;
