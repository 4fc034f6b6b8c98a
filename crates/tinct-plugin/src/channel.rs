//! One open plug-in channel: process, writer half, and per-channel state.

use std::collections::HashSet;
use std::fs::File;
use std::process::Child;
use std::thread::JoinHandle;

use tokio::sync::oneshot;

use tinct_protocol::framing::write_message;
use tinct_protocol::message::Message;
use tinct_protocol::{ChannelId, DialogHandle, DisplayHandle};

use crate::error::ChannelError;

/// Lifecycle of a channel.
///
/// `Closing` covers deferred teardown: the process is already gone but
/// notices raised by the plug-in are still on screen, so the record stays
/// alive until the last one is dismissed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closing,
    Closed,
}

/// How a channel ended, reported exactly once through the completion hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// The plug-in quit or hung up cleanly.
    Normal,
    /// The host force-killed the process.
    Killed,
}

/// Host-side record for one plug-in channel.
pub struct PluginChannel {
    pub id: ChannelId,
    /// Program name the channel was opened with.
    pub program: String,
    pub argv: Vec<String>,
    child: Option<Child>,
    writer: Option<File>,
    reader: Option<JoinHandle<()>>,
    state: ChannelState,
    /// Image this channel operates on by default.
    pub image: Option<u32>,
    /// Display context, if the plug-in was started from one.
    pub display: Option<DisplayHandle>,
    /// Images this channel created, reclaimed on a forced close.
    pub created_images: Vec<u32>,
    /// Dialogs owned by this channel.
    pub dialogs: Vec<DialogHandle>,
    /// Notices still on screen; a closing channel is freed only once this
    /// drains.
    pub pending_notices: HashSet<u64>,
    completion: Option<oneshot::Sender<CloseStatus>>,
    /// Last reported progress fraction.
    pub progress: f32,
}

impl PluginChannel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ChannelId,
        program: String,
        argv: Vec<String>,
        child: Child,
        writer: File,
        reader: JoinHandle<()>,
        image: Option<u32>,
        display: Option<DisplayHandle>,
        completion: oneshot::Sender<CloseStatus>,
    ) -> Self {
        PluginChannel {
            id,
            program,
            argv,
            child: Some(child),
            writer: Some(writer),
            reader: Some(reader),
            state: ChannelState::Open,
            image,
            display,
            created_images: Vec::new(),
            dialogs: Vec::new(),
            pending_notices: HashSet::new(),
            completion: Some(completion),
            progress: 0.0,
        }
    }

    /// A channel record with no live process behind it, for exercising
    /// dispatch against a raw pipe.
    #[cfg(test)]
    pub(crate) fn from_parts(
        id: ChannelId,
        writer: File,
        image: Option<u32>,
        display: Option<DisplayHandle>,
        completion: oneshot::Sender<CloseStatus>,
    ) -> Self {
        PluginChannel {
            id,
            program: "test".to_string(),
            argv: Vec::new(),
            child: None,
            writer: Some(writer),
            reader: None,
            state: ChannelState::Open,
            image,
            display,
            created_images: Vec::new(),
            dialogs: Vec::new(),
            pending_notices: HashSet::new(),
            completion: Some(completion),
            progress: 0.0,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub(crate) fn set_state(&mut self, state: ChannelState) {
        self.state = state;
    }

    /// Send one message to the plug-in.
    pub fn send(&mut self, message: &Message) -> Result<(), ChannelError> {
        if self.state != ChannelState::Open {
            return Err(ChannelError::NotOpen);
        }
        let writer = self.writer.as_mut().ok_or(ChannelError::NotOpen)?;
        let (tag, payload) = message.encode()?;
        write_message(writer, tag, &payload)?;
        Ok(())
    }

    /// Tear the transport down. Idempotent.
    ///
    /// Killing uses SIGKILL; a cooperative shutdown sends `QUIT` first via
    /// dispatch and only lands here after the plug-in hangs up. The reader
    /// handle is dropped, not joined: the thread unblocks on pipe EOF once
    /// the child is gone, and joining here could deadlock against a reader
    /// blocked on a full event queue.
    pub(crate) fn shutdown(&mut self, kill: bool) {
        self.writer = None;
        if let Some(mut child) = self.child.take() {
            if kill {
                log::warn!("killing plug-in '{}' (channel {})", self.program, self.id);
                // SAFETY: the pid came from a Child we still own.
                unsafe {
                    libc::kill(child.id() as libc::pid_t, libc::SIGKILL);
                }
            }
            match child.wait() {
                Ok(status) => {
                    log::debug!(
                        "plug-in '{}' (channel {}) exited: {status}",
                        self.program,
                        self.id
                    )
                }
                Err(e) => log::warn!("failed to reap plug-in '{}': {e}", self.program),
            }
        }
        drop(self.reader.take());
    }

    /// Fire the completion hook. The sender is consumed, so a channel can
    /// report its fate at most once no matter how many paths reach teardown.
    pub(crate) fn complete(&mut self, status: CloseStatus) {
        self.state = ChannelState::Closed;
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(status);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
