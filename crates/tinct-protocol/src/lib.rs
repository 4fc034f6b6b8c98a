//! Shared protocol types for host ↔ plug-in communication.
//!
//! This crate defines the typed message envelope, the per-kind payload
//! structs, the shared handle/geometry types, and the length-prefix framing
//! used by tinct's plug-in channel layer. It performs no process or pipe
//! management itself — that lives in `tinct-plugin`.

pub mod framing;
pub mod message;
pub mod tag;
mod types;

// Re-export everything at crate root to keep call sites short.

// types
pub use types::{
    ChannelId, DialogHandle, DisplayHandle, ImageHandle, ItemHandle, ItemKind, ItemValue,
    PixelKind, Rect,
};

// message
pub use message::{
    DialogOp, ImageColorParams, ImageDisplayParams, ImageFetchParams, ImageInfo, ImageNewParams,
    ImageUpdateParams, Message, MessageError, ParamsOp, ProgressReport, TransferParams,
};

// framing
pub use framing::{read_message, write_message, FrameError, HEADER_SIZE, MAX_PAYLOAD_SIZE};
