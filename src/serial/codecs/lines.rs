use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::serial::error::ReadError;

/// What the [`LinesCodec`] yields.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    /// A complete line, delimiter not included.
    Line(Vec<u8>),

    /// A line longer than allowed was thrown away.
    /// Holds the limit which was exceeded.
    Overlong(usize),
}

/// This codec has a configurable delimiter character for reading,
/// and a maximum line length after which input is discarded until the next delimiter.
#[derive(Debug, Clone)]
pub(crate) struct LinesCodec {
    /// How far we have looked for a newline into the buffer
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is not included in the yielded frames.
    read_delimiter: u8,

    /// Lines longer than this are not yielded.
    max_length: usize,

    /// Set while throwing away the rest of an overlong line.
    discarding: bool,
}

impl LinesCodec {
    /// Create a new codec.
    pub(crate) fn new(read_delimiter: u8, max_length: usize) -> Self {
        Self {
            cursor: 0,
            read_delimiter,
            max_length,
            discarding: false,
        }
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(b'\n', 4096)
    }
}

impl Decoder for LinesCodec {
    type Item = Frame;
    type Error = ReadError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();

        let look_at = &src[self.cursor..read_to];

        if let Some(position) = look_at.iter().position(|&byte| byte == self.read_delimiter) {
            // Since we might "start late" in the buffer (from the cursor),
            // the "global" position within the buffer has to be calculated.
            let actual_position = self.cursor + position;

            // Next time we need to start over.
            self.cursor = 0;

            // Split at the delimiter, getting a slice of the bytes before it.
            let line = src.split_to(actual_position);

            // Discard the delimiter by advancing the source buffer beyond it.
            src.advance(1);

            if self.discarding || line.len() > self.max_length {
                self.discarding = false;
                return Ok(Some(Frame::Overlong(self.max_length)));
            }

            Ok(Some(Frame::Line(line.to_vec())))
        } else if read_to > self.max_length {
            // No delimiter in sight and already too long.
            // Drop what we have, and keep dropping until a delimiter shows up.
            if !self.discarding {
                warn!(max_length = self.max_length, "Discarding overlong line");
            }
            src.clear();
            self.cursor = 0;
            self.discarding = true;

            Ok(None)
        } else {
            // We did not find a full frame.
            // The next time we are called the same buffer `src` will be provided to us (same starting point),
            // but possibly with more data.
            // Since our job is to find the delimiter, we don't need to re-read the bytes we have already looked at.
            self.cursor = read_to;

            // Indicate that we need more bytes to look at.
            Ok(None)
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        self.cursor = 0;

        if src.is_empty() {
            return Ok(None);
        }

        // The stream ended without a final delimiter.
        let rest = src.split_to(src.len());

        if std::mem::take(&mut self.discarding) {
            Ok(Some(Frame::Overlong(self.max_length)))
        } else {
            Ok(Some(Frame::Line(rest.to_vec())))
        }
    }
}
