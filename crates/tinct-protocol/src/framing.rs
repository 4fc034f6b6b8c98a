//! Length-prefix framing for the plug-in channel transport.
//!
//! Every message on the wire is a fixed 8-byte header — `i32` tag followed by
//! `i32` payload size, both big-endian — then exactly `size` payload bytes.
//! Zero-size payloads are legal and carry no body.

use std::io::{Read, Write};

/// Size of the `{tag, size}` frame header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Maximum frame payload size (16 MB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Errors that can occur while framing or de-framing messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds [`MAX_PAYLOAD_SIZE`].
    #[error("payload too large: {0} bytes (max {MAX_PAYLOAD_SIZE})")]
    PayloadTooLarge(usize),

    /// The header carried a negative payload size.
    #[error("invalid payload size: {0}")]
    InvalidSize(i32),

    /// The peer closed the stream in the middle of a frame.
    #[error("stream truncated mid-frame")]
    Truncated,

    /// Transport-level I/O failure.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write one framed message: header, then payload.
///
/// `write_all` loops on short writes, so a well-behaved peer sees either the
/// whole frame or an error.
pub fn write_message<W: Write>(w: &mut W, tag: i32, payload: &[u8]) -> Result<(), FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }
    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(&tag.to_be_bytes());
    header[4..].copy_from_slice(&(payload.len() as i32).to_be_bytes());
    w.write_all(&header)?;
    if !payload.is_empty() {
        w.write_all(payload)?;
    }
    Ok(())
}

/// Read one framed message.
///
/// Returns `Ok(Some((tag, payload)))` for a complete frame and `Ok(None)` on
/// a clean end-of-stream *before any header byte* — the peer hung up between
/// messages. EOF inside a header or payload is [`FrameError::Truncated`].
pub fn read_message<R: Read>(r: &mut R) -> Result<Option<(i32, Vec<u8>)>, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        match r.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(FrameError::Truncated),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let tag = i32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let size = i32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if size < 0 {
        return Err(FrameError::InvalidSize(size));
    }
    let size = size as usize;
    if size > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(size));
    }

    let mut payload = vec![0u8; size];
    if size > 0 {
        r.read_exact(&mut payload).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FrameError::Truncated
            } else {
                FrameError::Io(e)
            }
        })?;
    }
    Ok(Some((tag, payload)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out at most `chunk` bytes per call, to exercise the
    /// short-read loops.
    struct Trickle<'a> {
        data: &'a [u8],
        pos: usize,
        chunk: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn round_trip_single_message() {
        let mut buf = Vec::new();
        write_message(&mut buf, 7, b"hello plug-in").unwrap();
        let (tag, payload) = read_message(&mut Cursor::new(&buf)).unwrap().unwrap();
        assert_eq!(tag, 7);
        assert_eq!(payload, b"hello plug-in");
    }

    #[test]
    fn round_trip_sequence_with_zero_payloads() {
        let frames: Vec<(i32, Vec<u8>)> = vec![
            (0, vec![]),
            (3, b"abc".to_vec()),
            (12, vec![]),
            (5, vec![0u8; 1000]),
        ];
        let mut buf = Vec::new();
        for (tag, payload) in &frames {
            write_message(&mut buf, *tag, payload).unwrap();
        }
        let mut cursor = Cursor::new(&buf);
        for (tag, payload) in &frames {
            let (t, p) = read_message(&mut cursor).unwrap().unwrap();
            assert_eq!(t, *tag);
            assert_eq!(&p, payload);
        }
        assert!(read_message(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn round_trip_survives_partial_reads() {
        let mut buf = Vec::new();
        write_message(&mut buf, 11, b"delivered in pieces").unwrap();
        write_message(&mut buf, 6, &[]).unwrap();
        let mut trickle = Trickle {
            data: &buf,
            pos: 0,
            chunk: 3,
        };
        let (tag, payload) = read_message(&mut trickle).unwrap().unwrap();
        assert_eq!(tag, 11);
        assert_eq!(payload, b"delivered in pieces");
        let (tag, payload) = read_message(&mut trickle).unwrap().unwrap();
        assert_eq!(tag, 6);
        assert!(payload.is_empty());
    }

    #[test]
    fn clean_eof_between_frames_is_none() {
        assert!(read_message(&mut Cursor::new(&[])).unwrap().is_none());
    }

    #[test]
    fn eof_inside_header_is_truncated() {
        let mut buf = Vec::new();
        write_message(&mut buf, 2, b"x").unwrap();
        let err = read_message(&mut Cursor::new(&buf[..5])).unwrap_err();
        assert!(matches!(err, FrameError::Truncated));
    }

    #[test]
    fn eof_inside_payload_is_truncated() {
        let mut buf = Vec::new();
        write_message(&mut buf, 2, b"payload").unwrap();
        let err = read_message(&mut Cursor::new(&buf[..buf.len() - 2])).unwrap_err();
        assert!(matches!(err, FrameError::Truncated));
    }

    #[test]
    fn negative_size_rejected() {
        let mut buf = 9i32.to_be_bytes().to_vec();
        buf.extend_from_slice(&(-1i32).to_be_bytes());
        let err = read_message(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, FrameError::InvalidSize(-1)));
    }

    #[test]
    fn oversized_rejected_on_read() {
        let mut buf = 1i32.to_be_bytes().to_vec();
        buf.extend_from_slice(&((MAX_PAYLOAD_SIZE as i32) + 1).to_be_bytes());
        let err = read_message(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge(_)));
    }
}
