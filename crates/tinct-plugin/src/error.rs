//! Error types for the plug-in channel layer.

use tinct_protocol::framing::FrameError;
use tinct_protocol::message::MessageError;
use tinct_raster::RasterError;

/// Errors that can occur while opening or driving a plug-in channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The plug-in executable could not be located on the search path.
    #[error("plug-in executable not found: {0}")]
    Spawn(String),

    /// The OS failed to start the plug-in process.
    #[error("failed to start plug-in process: {0}")]
    Process(#[source] std::io::Error),

    /// The peer sent something the host never accepts. Fatal to the
    /// offending channel: it is force-closed and freed, with no partial
    /// recovery.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Framing-level transport failure.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Payload codec failure.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// The channel is not open for sending.
    #[error("channel is not open")]
    NotOpen,

    /// Image store failure while servicing a message.
    #[error(transparent)]
    Raster(#[from] RasterError),

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
