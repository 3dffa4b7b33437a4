//! Reassembly of length-delimited PDUs from an arbitrarily chunked byte stream.
//!
//! A socket hands us byte chunks of whatever size the kernel feels like.
//! [reassemble] turns `leftover + new chunk` into zero or more complete frames plus
//! the bytes that can't be resolved into a frame yet.
//!
//! Feeding a stream chunk by chunk (carrying the leftover forward) yields exactly the
//! same frames as feeding the whole stream at once.
use std::convert::TryFrom;

use byteorder::{BigEndian, ByteOrder};
use serde_derive::{Deserialize, Serialize};

use crate::error::Error;

/// Upper bound for a single frame if nothing else is configured.
/// This is checked before the frame is sliced off, so a hostile length field can't make
/// us buffer arbitrary amounts of data.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// A single, complete PDU including its header.
pub type Frame = Vec<u8>;

/// How the decoded length field relates to the size of the frame.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthMode {
    /// The length field contains the size of the whole frame, header included.
    /// This is how RTR and most TLV based protocols do it.
    #[default]
    Total,
    /// The length field contains the amount of bytes following the fixed header.
    Payload,
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

/// Describes where the length field lives inside a frame header.
#[derive(PartialEq, Eq, Clone, Debug, Deserialize, Serialize)]
pub struct FramingParams {
    /// The amount of bytes needed before the length field can be decoded.
    pub min_header_len: usize,
    /// Offset of the first byte of the big-endian length field.
    pub length_field_start: usize,
    /// Exclusive end of the length field.
    pub length_field_end: usize,
    #[serde(default)]
    pub length_mode: LengthMode,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

impl FramingParams {
    pub fn new(
        min_header_len: usize,
        length_field_start: usize,
        length_field_end: usize,
    ) -> Result<Self, Error> {
        let params = FramingParams {
            min_header_len,
            length_field_start,
            length_field_end,
            length_mode: LengthMode::Total,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        };
        params.validate()?;

        Ok(params)
    }

    pub fn with_length_mode(mut self, length_mode: LengthMode) -> Self {
        self.length_mode = length_mode;
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Check the invariant `start < end <= min_header_len`.
    /// The length field must fit into a u64.
    pub fn validate(&self) -> Result<(), Error> {
        if self.length_field_start >= self.length_field_end {
            return Err(Error::InvalidFraming(format!(
                "length field start ({}) must be smaller than its end ({})",
                self.length_field_start, self.length_field_end
            )));
        }
        if self.length_field_end > self.min_header_len {
            return Err(Error::InvalidFraming(format!(
                "length field end ({}) exceeds the minimum header length ({})",
                self.length_field_end, self.min_header_len
            )));
        }
        if self.length_field_end - self.length_field_start > 8 {
            return Err(Error::InvalidFraming(
                "length fields wider than 8 bytes aren't supported".into(),
            ));
        }
        if self.max_frame_len < self.min_header_len {
            return Err(Error::InvalidFraming(format!(
                "maximum frame length ({}) is smaller than the header ({})",
                self.max_frame_len, self.min_header_len
            )));
        }

        Ok(())
    }

    /// Decode the length field of `header` and compute the full length of the frame.
    ///
    /// Fails with [Error::InvalidFraming] for inconsistent parameters and with
    /// [Error::MalformedFrame] if `header` is shorter than `min_header_len`.
    pub fn frame_len(&self, header: &[u8]) -> Result<usize, Error> {
        self.validate()?;
        if header.len() < self.min_header_len {
            return Err(Error::MalformedFrame(format!(
                "header has {} bytes, {} are needed",
                header.len(),
                self.min_header_len
            )));
        }

        let field = &header[self.length_field_start..self.length_field_end];
        let declared = BigEndian::read_uint(field, field.len());

        let frame_len = match self.length_mode {
            LengthMode::Total => {
                if declared < self.min_header_len as u64 {
                    return Err(Error::MalformedFrame(format!(
                        "declared length {declared} is shorter than the {} byte header",
                        self.min_header_len
                    )));
                }
                declared
            }
            LengthMode::Payload => declared.saturating_add(self.min_header_len as u64),
        };

        if frame_len > self.max_frame_len as u64 {
            return Err(Error::MalformedFrame(format!(
                "frame length {frame_len} exceeds the maximum of {} bytes",
                self.max_frame_len
            )));
        }

        usize::try_from(frame_len)
            .map_err(|_| Error::MalformedFrame(format!("frame length {frame_len} overflows")))
    }
}

/// Split `buffer` into all complete frames it contains.
///
/// Returns the frames in stream order and the bytes that don't form a complete frame yet.
/// Those have to be prepended to the next chunk read from the socket.
///
/// A buffer shorter than the header isn't an error, it's simply returned as leftover.
/// A degenerate length field is fatal, since we cannot find the start of the next frame.
pub fn reassemble(buffer: &[u8], params: &FramingParams) -> Result<(Vec<Frame>, Vec<u8>), Error> {
    params.validate()?;

    let mut frames = Vec::new();
    let mut offset = 0;

    loop {
        let remaining = &buffer[offset..];
        if remaining.len() < params.min_header_len {
            break;
        }

        let frame_len = params.frame_len(remaining)?;
        if remaining.len() < frame_len {
            break;
        }

        frames.push(remaining[..frame_len].to_vec());
        offset += frame_len;
    }

    Ok((frames, buffer[offset..].to_vec()))
}
