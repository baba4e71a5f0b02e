use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Every protocol line ends with CR LF, in both directions.
pub const TERMINATOR: &[u8] = b"\r\n";

/// Longest reply line we buffer before giving up on it.
pub const MAX_LINE_LENGTH: usize = 1024;

/// One unit read from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line, terminator stripped.
    Line(String),
    /// More than [`MAX_LINE_LENGTH`] bytes arrived without a terminator.
    /// They were dropped, as is the rest of that line.
    Overflow,
}

#[derive(Debug, Default)]
pub struct LineCodec {
    discarding: bool,
}

impl LineCodec {
    fn find_terminator(src: &BytesMut) -> Option<usize> {
        src.as_ref()
            .windows(TERMINATOR.len())
            .position(|w| w == TERMINATOR)
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    // Content problems are reported as frames, not errors: a Framed stream
    // stops after the first decode error and we want the link to survive a
    // garbled reply.
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // A trailing CR may be the start of the terminator.
            let trailing_cr = usize::from(src.last() == Some(&b'\r'));
            match Self::find_terminator(src) {
                Some(n) if self.discarding => {
                    let _ = src.split_to(n + TERMINATOR.len());
                    self.discarding = false;
                    // Tail of an overflowed line, already reported.
                    continue;
                }
                Some(n) if n > MAX_LINE_LENGTH => {
                    let _ = src.split_to(n + TERMINATOR.len());
                    return Ok(Some(Frame::Overflow));
                }
                Some(n) => {
                    let line = src.split_to(n + TERMINATOR.len());
                    let text = String::from_utf8_lossy(&line[..n]).into_owned();
                    return Ok(Some(Frame::Line(text)));
                }
                None if self.discarding => {
                    let _ = src.split_to(src.len() - trailing_cr);
                    return Ok(None);
                }
                None if src.len() - trailing_cr > MAX_LINE_LENGTH => {
                    let _ = src.split_to(src.len() - trailing_cr);
                    self.discarding = true;
                    return Ok(Some(Frame::Overflow));
                }
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                // An unterminated fragment is not a reply.
                src.clear();
                Ok(None)
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "line must not contain CR or LF",
            ));
        }
        dst.reserve(item.len() + TERMINATOR.len());
        dst.put_slice(item.as_bytes());
        dst.put_slice(TERMINATOR);
        Ok(())
    }
}
