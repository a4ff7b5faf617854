//! Chunked large-message transport.
//!
//! A payload that fits the broker's size limit travels as one message. A larger
//! one is framed as a one-byte begin marker, a run of fixed-size chunks and a
//! one-byte end marker, all sent in order to the same queue. The receiver tells
//! control from data by length and value alone, so the sender guarantees it never
//! emits a one-byte data message equal to a marker.

mod envelope;
mod receiver;
mod sender;

pub use envelope::{Envelope, BEGIN_MARKER, END_MARKER};
pub use receiver::{ReassemblyState, Reassembler};
pub use sender::{plan_chunks, ChunkedSender, DeliveryMode, DeliveryReport};

use sha2::{Digest, Sha256};

/// Size of one chunk of an oversized payload.
pub const CHUNK_SIZE: usize = 200_000;

/// Hex SHA-256 of a payload, logged on both ends to correlate documents.
pub fn content_hash(payload: &[u8]) -> String {
    format!("{:x}", Sha256::digest(payload))
}
