//! Inbound line framing for the game-client bridge socket.
//!
//! The bridge sends one JSON message per `\n`-terminated line and emits a
//! bare newline as a keepalive while idle. Outbound traffic is framed by the
//! writer task directly, so this codec only decodes.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Default cap on one inbound line: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Decoder yielding one non-blank line per bridge message.
///
/// # Decoder
///
/// - Blank and whitespace-only lines (keepalives) are consumed and never
///   yielded.
/// - A trailing `\r` is stripped, so CRLF bridges decode the same.
/// - A line longer than the cap yields [`AppError::Bridge`] once; the rest
///   of that line is discarded and decoding resumes at the next newline.
/// - Socket failures surface as [`AppError::Io`], which the reader treats
///   as end of stream.
#[derive(Debug)]
pub struct BridgeCodec {
    lines: LinesCodec,
    max_length: usize,
}

impl BridgeCodec {
    /// Codec capped at [`MAX_LINE_BYTES`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Codec capped at `max_length` bytes per line.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    /// Per-line cap.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn map_error(&self, err: LinesCodecError) -> AppError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => AppError::Bridge(format!(
                "bridge line exceeded {} bytes; dropped",
                self.max_length
            )),
            LinesCodecError::Io(err) => AppError::Io(err.to_string()),
        }
    }
}

impl Default for BridgeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BridgeCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.lines.decode(src) {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(frame) => return Ok(frame),
                Err(err) => return Err(self.map_error(err)),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.lines.decode_eof(src) {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(frame) => return Ok(frame),
                Err(err) => return Err(self.map_error(err)),
            }
        }
    }
}
