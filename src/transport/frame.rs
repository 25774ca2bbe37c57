//! Frame encoding and decoding.
//!
//! Wire format (7-byte header + opaque payload):
//! ```text
//! +---------+------------------+-------------------------+-----------+
//! | Channel | Sequence         | Send timestamp (ms)     | Payload   |
//! | 1 byte  | 2 bytes (BE16)   | 4 bytes (BE32)          | remaining |
//! +---------+------------------+-------------------------+-----------+
//! ```
//!
//! Channel tag `0x00` is unreliable, `0x01` is reliable. The codec never
//! looks inside the payload.
//!
//! Decoding is stricter than a bare length check: a frame of at least
//! [`HEADER_SIZE`] bytes whose tag is neither channel is rejected with
//! [`FrameError::UnknownChannel`] rather than guessed at. The connection
//! counts it as malformed and carries on.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::core::constants::{CHANNEL_TAG_RELIABLE, CHANNEL_TAG_UNRELIABLE, HEADER_SIZE};

/// Frame decoding errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than a full header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum required length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Channel tag outside the known set.
    #[error("unknown channel tag: {0:#04x}")]
    UnknownChannel(u8),
}

/// Logical delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Channel {
    /// Unordered, best-effort delivery.
    Unreliable,
    /// Ordered delivery with bounded reorder latency.
    Reliable,
}

impl Channel {
    /// Parse a channel from its wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            CHANNEL_TAG_UNRELIABLE => Some(Self::Unreliable),
            CHANNEL_TAG_RELIABLE => Some(Self::Reliable),
            _ => None,
        }
    }

    /// Wire tag for this channel.
    pub fn tag(self) -> u8 {
        match self {
            Self::Unreliable => CHANNEL_TAG_UNRELIABLE,
            Self::Reliable => CHANNEL_TAG_RELIABLE,
        }
    }

    /// Index used for per-channel arrays.
    pub(crate) fn index(self) -> usize {
        self.tag() as usize
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreliable => f.write_str("unreliable"),
            Self::Reliable => f.write_str("reliable"),
        }
    }
}

/// A decoded frame. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Channel the frame belongs to.
    pub channel: Channel,
    /// Per-channel sequence number.
    pub sequence: u16,
    /// Sender wall-clock milliseconds (truncated to 32 bits).
    pub timestamp_ms: u32,
    /// Application payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(channel: Channel, sequence: u16, timestamp_ms: u32, payload: Bytes) -> Self {
        Self {
            channel,
            sequence,
            timestamp_ms,
            payload,
        }
    }

    /// Encode this frame.
    pub fn encode(&self) -> Bytes {
        encode(self.channel, self.sequence, self.timestamp_ms, &self.payload)
    }

    /// Total encoded length.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a header followed by `payload`.
pub fn encode(channel: Channel, sequence: u16, timestamp_ms: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(channel.tag());
    buf.put_u16(sequence);
    buf.put_u32(timestamp_ms);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode a frame. The payload shares the input buffer.
pub fn decode(bytes: &Bytes) -> Result<Frame, FrameError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FrameError::TooShort {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    }

    let channel = Channel::from_tag(bytes[0]).ok_or(FrameError::UnknownChannel(bytes[0]))?;
    let sequence = u16::from_be_bytes([bytes[1], bytes[2]]);
    let timestamp_ms = u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);

    Ok(Frame {
        channel,
        sequence,
        timestamp_ms,
        payload: bytes.slice(HEADER_SIZE..),
    })
}
