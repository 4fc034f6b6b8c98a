//! Plug-in process channels for the tinct host.
//!
//! Filters run as separate processes talking a length-prefixed message
//! protocol over pipes. This crate carries both ends:
//!
//! - [`HostContext`] — the host side: spawning plug-ins, the per-channel
//!   reader threads, message dispatch against the image store, remote
//!   dialog proxies, notices, and deferred teardown.
//! - [`PluginConnection`] — the plug-in side: fd handoff from the command
//!   line and typed send/receive.

pub mod channel;
pub mod client;
pub mod dialog;
pub mod error;
pub mod host;
pub mod reader;
pub mod spawn;

pub use channel::{ChannelState, CloseStatus, PluginChannel};
pub use client::PluginConnection;
pub use dialog::{Dialog, DialogItem, DialogRegistry};
pub use error::ChannelError;
pub use host::{DisplaySurface, HostContext, Notice};
pub use reader::ChannelEvent;
