//! Per-channel reader threads.
//!
//! Each open channel owns one blocking reader thread that de-frames messages
//! off the plug-in's pipe and forwards them to the host's event queue. The
//! thread exits on end-of-stream or the first transport error; the host side
//! learns which from the final event.

use std::fs::File;
use std::os::fd::OwnedFd;
use std::thread::JoinHandle;

use tokio::sync::mpsc;

use tinct_protocol::framing::{read_message, FrameError};
use tinct_protocol::ChannelId;

/// One event from a channel's reader thread.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A complete frame arrived.
    Frame {
        channel: ChannelId,
        tag: i32,
        payload: Vec<u8>,
    },
    /// Clean end-of-stream between frames: the plug-in hung up.
    Closed { channel: ChannelId },
    /// Transport failure; the channel must be torn down.
    ReadError {
        channel: ChannelId,
        error: FrameError,
    },
}

/// Spawn the reader thread for one channel.
///
/// Uses `blocking_send` so a stalled host applies backpressure to the pipe
/// instead of buffering without bound. The handle is usually dropped rather
/// than joined: the thread unblocks on its own once the pipe reaches EOF
/// after the child dies.
pub fn spawn_reader(
    channel: ChannelId,
    fd: OwnedFd,
    tx: mpsc::Sender<ChannelEvent>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("plugin-reader-{channel}"))
        .spawn(move || {
            let mut pipe = File::from(fd);
            loop {
                match read_message(&mut pipe) {
                    Ok(Some((tag, payload))) => {
                        if tx
                            .blocking_send(ChannelEvent::Frame {
                                channel,
                                tag,
                                payload,
                            })
                            .is_err()
                        {
                            // Host side dropped the queue.
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = tx.blocking_send(ChannelEvent::Closed { channel });
                        break;
                    }
                    Err(error) => {
                        let _ = tx.blocking_send(ChannelEvent::ReadError { channel, error });
                        break;
                    }
                }
            }
        })
        .expect("failed to spawn plug-in reader thread")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::{FromRawFd, OwnedFd};

    use tinct_protocol::framing::write_message;
    use tinct_protocol::tag;

    fn pipe_pair() -> (OwnedFd, OwnedFd) {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[test]
    fn frames_then_clean_close() {
        let (read, write) = pipe_pair();
        let (tx, mut rx) = mpsc::channel(16);
        let handle = spawn_reader(ChannelId(1), read, tx);

        let mut writer = File::from(write);
        write_message(&mut writer, tag::PROGRESS, b"{\"fraction\":0.5}").unwrap();
        write_message(&mut writer, tag::QUIT, &[]).unwrap();
        drop(writer);

        match rx.blocking_recv().unwrap() {
            ChannelEvent::Frame { channel, tag: t, .. } => {
                assert_eq!(channel, ChannelId(1));
                assert_eq!(t, tag::PROGRESS);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            rx.blocking_recv().unwrap(),
            ChannelEvent::Frame { tag: t, .. } if t == tag::QUIT
        ));
        assert!(matches!(
            rx.blocking_recv().unwrap(),
            ChannelEvent::Closed { channel } if channel == ChannelId(1)
        ));
        handle.join().unwrap();
    }

    #[test]
    fn truncated_stream_reports_error() {
        let (read, write) = pipe_pair();
        let (tx, mut rx) = mpsc::channel(16);
        let handle = spawn_reader(ChannelId(2), read, tx);

        let mut writer = File::from(write);
        // Half a header, then hang up.
        writer.write_all(&[0, 0, 0, 9]).unwrap();
        drop(writer);

        match rx.blocking_recv().unwrap() {
            ChannelEvent::ReadError { channel, error } => {
                assert_eq!(channel, ChannelId(2));
                assert!(matches!(error, FrameError::Truncated));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        handle.join().unwrap();
    }
}
