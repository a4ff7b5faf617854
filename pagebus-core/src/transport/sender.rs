use std::sync::Arc;

use tracing::{debug, error, info};

use super::envelope::{Envelope, BEGIN_MARKER, END_MARKER};
use super::{content_hash, CHUNK_SIZE};
use crate::contract::Broker;
use crate::error::{BrokerError, DeliveryError};

/// How a document travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Single,
    Chunked { chunks: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub mode: DeliveryMode,
    pub bytes: usize,
    pub content_hash: String,
}

/// Splits `payload` into `chunk_size` slices for a chunked send.
///
/// No empty trailing chunk is produced. If the last chunk would be a single byte
/// equal to a marker value, one byte is moved into it from the previous chunk, so
/// the number of chunks is still `ceil(len / chunk_size)`.
pub fn plan_chunks(payload: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    let chunk_size = chunk_size.max(2);
    let mut chunks: Vec<&[u8]> = payload.chunks(chunk_size).collect();
    let n = chunks.len();
    if n >= 2 && Envelope::is_ambiguous(chunks[n - 1]) {
        let split = payload.len() - 2;
        chunks[n - 2] = &payload[(n - 2) * chunk_size..split];
        chunks[n - 1] = &payload[split..];
    }
    chunks
}

/// Producer side of the chunked transport, bound to one document queue.
pub struct ChunkedSender {
    broker: Arc<dyn Broker>,
    queue: String,
    chunk_size: usize,
}

impl ChunkedSender {
    pub fn new(broker: Arc<dyn Broker>, queue: impl Into<String>) -> Self {
        Self {
            broker,
            queue: queue.into(),
            chunk_size: CHUNK_SIZE,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Sends one document, falling back to chunked framing when the broker
    /// rejects it as too large.
    ///
    /// Any failure means the whole document was not delivered; nothing is
    /// resumed or resent here.
    pub async fn send(&self, payload: &[u8]) -> Result<DeliveryReport, DeliveryError> {
        if let [marker @ (BEGIN_MARKER | END_MARKER)] = payload {
            error!(marker, "[SEND] Refusing one-byte payload equal to a control marker");
            return Err(DeliveryError::AmbiguousPayload(*marker));
        }
        let hash = content_hash(payload);

        match self.broker.send(&self.queue, payload.to_vec()).await {
            Ok(()) => {
                info!(queue = %self.queue, bytes = payload.len(), content_hash = %hash, "[SEND] Document sent as a single message");
                Ok(DeliveryReport {
                    mode: DeliveryMode::Single,
                    bytes: payload.len(),
                    content_hash: hash,
                })
            }
            Err(BrokerError::MessageTooLarge { size, limit }) => {
                info!(size, limit, "[SEND] Document exceeds the broker limit, switching to chunked mode");
                let chunks = self.send_chunked(payload).await?;
                info!(queue = %self.queue, bytes = payload.len(), chunks, content_hash = %hash, "[SEND] Document sent in chunks");
                Ok(DeliveryReport {
                    mode: DeliveryMode::Chunked { chunks },
                    bytes: payload.len(),
                    content_hash: hash,
                })
            }
            Err(e) => {
                error!(queue = %self.queue, error = %e, "[SEND] Single-message send failed");
                Err(DeliveryError::Single(e))
            }
        }
    }

    async fn send_chunked(&self, payload: &[u8]) -> Result<usize, DeliveryError> {
        let chunks = plan_chunks(payload, self.chunk_size);
        let total = chunks.len() + 2;
        let messages = std::iter::once(vec![BEGIN_MARKER])
            .chain(chunks.iter().map(|c| c.to_vec()))
            .chain(std::iter::once(vec![END_MARKER]));

        for (index, body) in messages.enumerate() {
            let size = body.len();
            if let Err(source) = self.broker.send(&self.queue, body).await {
                error!(index, total, error = %source, "[SEND] Chunked send failed, document is lost");
                return Err(DeliveryError::Chunk { index, total, source });
            }
            debug!(index, total, size, "[SEND] Sent chunk message");
        }
        Ok(chunks.len())
    }
}
