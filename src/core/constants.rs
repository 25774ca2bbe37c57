//! Protocol constants.
//!
//! Wire-format values are fixed and MUST NOT be changed; the tunables at the
//! bottom are only the defaults used by [`ConnectionConfig`](crate::transport::ConnectionConfig).

use std::time::Duration;

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Channel tag for the unreliable (best-effort) channel.
pub const CHANNEL_TAG_UNRELIABLE: u8 = 0x00;

/// Channel tag for the reliable (ordered) channel.
pub const CHANNEL_TAG_RELIABLE: u8 = 0x01;

/// Size of the channel tag field.
pub const CHANNEL_TAG_SIZE: usize = 1;

/// Size of the sequence number field (big-endian u16).
pub const SEQUENCE_SIZE: usize = 2;

/// Size of the send timestamp field (big-endian u32, milliseconds).
pub const TIMESTAMP_SIZE: usize = 4;

/// Fixed frame header size (tag + sequence + timestamp).
pub const HEADER_SIZE: usize = CHANNEL_TAG_SIZE + SEQUENCE_SIZE + TIMESTAMP_SIZE;

/// Size of the length prefix placed before each frame on the ordered stream.
pub const STREAM_LENGTH_PREFIX_SIZE: usize = 4;

/// Largest frame accepted from the ordered stream.
pub const MAX_STREAM_FRAME_SIZE: usize = 1 << 20;

/// Application protocol name negotiated during the handshake.
pub const ALPN: &[u8] = b"dualnet";

/// Datagram payload budget, below the common 1280-byte path MTU.
pub const MAX_DATAGRAM_FRAME_SIZE: usize = 1200;

// =============================================================================
// SEQUENCE SPACE
// =============================================================================

/// Number of distinct sequence numbers (u16 ring).
pub const SEQUENCE_SPACE: u32 = 1 << 16;

/// Half of the ring; forward distances below this are "ahead".
pub const SEQUENCE_HALF_RANGE: u16 = 1 << 15;

// =============================================================================
// DEFAULT TUNABLES
// =============================================================================

/// How long the reorder buffer waits for a missing reliable sequence.
pub const DEFAULT_GAP_DEADLINE: Duration = Duration::from_millis(200);

/// Retention window for throughput accounting.
pub const DEFAULT_METRICS_WINDOW: Duration = Duration::from_secs(5);

/// Maximum number of out-of-order reliable frames held at once.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// RFC 3550 jitter gain denominator.
pub const JITTER_GAIN: f64 = 16.0;
