//! The plug-in side of the protocol.
//!
//! A plug-in process receives its pipe ends as raw fd numbers after a
//! `-tinct` marker on the command line, wraps them in a
//! [`PluginConnection`], and talks typed messages from there.

use std::fs::File;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use anyhow::{bail, Context};

use tinct_protocol::framing::{read_message, write_message};
use tinct_protocol::message::Message;

use crate::error::ChannelError;

/// A plug-in's connection back to its host.
pub struct PluginConnection {
    reader: File,
    writer: File,
}

impl PluginConnection {
    /// Build the connection from the process's own command line:
    /// `<program> -tinct <read_fd> <write_fd>`.
    pub fn from_env_args() -> anyhow::Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let marker = args
            .iter()
            .position(|a| a == "-tinct")
            .context("missing -tinct marker; was this process started by a tinct host?")?;
        if args.len() < marker + 3 {
            bail!("-tinct requires two fd arguments");
        }
        let read_fd: RawFd = args[marker + 1]
            .parse()
            .with_context(|| format!("bad read fd '{}'", args[marker + 1]))?;
        let write_fd: RawFd = args[marker + 2]
            .parse()
            .with_context(|| format!("bad write fd '{}'", args[marker + 2]))?;
        // SAFETY: the host opened these fds for us and nothing else in this
        // process owns them.
        let (read, write) =
            unsafe { (OwnedFd::from_raw_fd(read_fd), OwnedFd::from_raw_fd(write_fd)) };
        Ok(Self::from_fds(read, write))
    }

    pub fn from_fds(read: OwnedFd, write: OwnedFd) -> Self {
        PluginConnection {
            reader: File::from(read),
            writer: File::from(write),
        }
    }

    /// Send one typed message to the host.
    pub fn send(&mut self, message: &Message) -> Result<(), ChannelError> {
        let (tag, payload) = message.encode()?;
        write_message(&mut self.writer, tag, &payload)?;
        Ok(())
    }

    /// Send a raw frame, bypassing the typed encoder.
    pub fn send_raw(&mut self, tag: i32, payload: &[u8]) -> Result<(), ChannelError> {
        write_message(&mut self.writer, tag, payload)?;
        Ok(())
    }

    /// Receive the next message. `Ok(None)` means the host hung up.
    pub fn recv(&mut self) -> Result<Option<Message>, ChannelError> {
        match read_message(&mut self.reader)? {
            Some((tag, payload)) => Ok(Some(Message::decode(tag, &payload)?)),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_protocol::message::ProgressReport;

    fn pipe_pair() -> (OwnedFd, OwnedFd) {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[test]
    fn loopback_send_and_recv() {
        let (read, write) = pipe_pair();
        let mut conn = PluginConnection::from_fds(read, write);

        conn.send(&Message::Progress(ProgressReport {
            fraction: 0.25,
            text: Some("working".into()),
        }))
        .unwrap();

        match conn.recv().unwrap().unwrap() {
            Message::Progress(report) => {
                assert!((report.fraction - 0.25).abs() < f32::EPSILON);
                assert_eq!(report.text.as_deref(), Some("working"));
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[test]
    fn recv_reports_hangup_as_none() {
        let (read, write) = pipe_pair();
        let (read2, _keep) = pipe_pair();
        drop(write);
        let mut conn = PluginConnection::from_fds(read, read2);
        assert!(conn.recv().unwrap().is_none());
    }
}
