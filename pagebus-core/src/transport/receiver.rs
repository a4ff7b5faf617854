use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::envelope::Envelope;
use crate::error::ReassemblyError;

/// Where the receiver is within the envelope stream.
#[derive(Debug, Default)]
pub enum ReassemblyState {
    #[default]
    Idle,
    Accumulating {
        buffer: Vec<u8>,
        last_activity: Instant,
    },
    /// A sequence overflowed the size cap; its remaining chunks are dropped.
    Discarding { last_activity: Instant },
}

/// Consumer side of the chunked transport for one inbound queue.
///
/// Messages must be fed in delivery order. Completed payloads are returned from
/// [`Reassembler::accept`]; the caller persists them.
#[derive(Debug, Default)]
pub struct Reassembler {
    state: ReassemblyState,
    max_document_bytes: Option<usize>,
    deadline: Option<Duration>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the size of a reassembled document.
    pub fn with_max_document_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_document_bytes = limit;
        self
    }

    /// Discards a partial document after `deadline` without any message.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn state(&self) -> &ReassemblyState {
        &self.state
    }

    pub fn is_accumulating(&self) -> bool {
        matches!(self.state, ReassemblyState::Accumulating { .. })
    }

    /// Feeds one message. Returns a complete payload when one is ready.
    pub fn accept(&mut self, body: Vec<u8>) -> Result<Option<Vec<u8>>, ReassemblyError> {
        let now = Instant::now();
        match (Envelope::classify(&body), &mut self.state) {
            (Envelope::Begin, ReassemblyState::Accumulating { buffer, .. }) => {
                warn!(discarded = buffer.len(), "[RECEIVE] Begin marker inside a chunk sequence, restarting");
                self.begin(now);
                Ok(None)
            }
            (Envelope::Begin, _) => {
                debug!("[RECEIVE] Chunk sequence started");
                self.begin(now);
                Ok(None)
            }
            (Envelope::End, ReassemblyState::Accumulating { .. }) => {
                match std::mem::take(&mut self.state) {
                    ReassemblyState::Accumulating { buffer, .. } => {
                        debug!(size = buffer.len(), "[RECEIVE] Chunk sequence complete");
                        Ok(Some(buffer))
                    }
                    _ => Ok(None),
                }
            }
            (Envelope::End, ReassemblyState::Discarding { .. }) => {
                debug!("[RECEIVE] End of discarded chunk sequence");
                self.state = ReassemblyState::Idle;
                Ok(None)
            }
            (Envelope::End, ReassemblyState::Idle) => {
                warn!("[RECEIVE] Stray end marker ignored");
                Ok(None)
            }
            (Envelope::Data(_), ReassemblyState::Idle) => Ok(Some(body)),
            (Envelope::Data(data), ReassemblyState::Accumulating { buffer, last_activity }) => {
                if let Some(limit) = self.max_document_bytes {
                    if buffer.len() + data.len() > limit {
                        let discarded = buffer.len();
                        error!(limit, discarded, "[RECEIVE] Document exceeds the size cap, discarding it");
                        self.state = ReassemblyState::Discarding { last_activity: now };
                        return Err(ReassemblyError::Oversized { limit, discarded });
                    }
                }
                buffer.extend_from_slice(data);
                *last_activity = now;
                Ok(None)
            }
            (Envelope::Data(data), ReassemblyState::Discarding { last_activity }) => {
                debug!(size = data.len(), "[RECEIVE] Dropping chunk of discarded document");
                *last_activity = now;
                Ok(None)
            }
        }
    }

    fn begin(&mut self, now: Instant) {
        self.state = ReassemblyState::Accumulating {
            buffer: Vec::new(),
            last_activity: now,
        };
    }

    /// Drops a partial or discarded sequence whose last message is older than the deadline.
    ///
    /// Returns the number of buffered bytes dropped, if a sequence expired.
    pub fn expire_stale(&mut self, now: Instant) -> Option<usize> {
        let deadline = self.deadline?;
        let discarded = match &self.state {
            ReassemblyState::Accumulating {
                buffer,
                last_activity,
            } if now.duration_since(*last_activity) >= deadline => buffer.len(),
            ReassemblyState::Discarding { last_activity } if now.duration_since(*last_activity) >= deadline => 0,
            _ => return None,
        };
        warn!(discarded, ?deadline, "[RECEIVE] Chunk sequence timed out, back to idle");
        self.state = ReassemblyState::Idle;
        Some(discarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BEGIN_MARKER, END_MARKER};

    #[test]
    fn whole_message_is_flushed_immediately() {
        let mut r = Reassembler::new();
        assert_eq!(r.accept(b"hello".to_vec()), Ok(Some(b"hello".to_vec())));
        assert!(matches!(r.state(), ReassemblyState::Idle));
    }

    #[test]
    fn chunks_between_markers_are_joined() {
        let mut r = Reassembler::new();
        assert_eq!(r.accept(vec![BEGIN_MARKER]), Ok(None));
        assert_eq!(r.accept(b"ab".to_vec()), Ok(None));
        assert_eq!(r.accept(b"cd".to_vec()), Ok(None));
        assert_eq!(r.accept(vec![END_MARKER]), Ok(Some(b"abcd".to_vec())));
        assert!(!r.is_accumulating());
    }

    #[test]
    fn stray_end_marker_is_ignored() {
        let mut r = Reassembler::new();
        assert_eq!(r.accept(vec![END_MARKER]), Ok(None));
        assert_eq!(r.accept(b"xy".to_vec()), Ok(Some(b"xy".to_vec())));
    }

    #[test]
    fn second_begin_restarts_the_sequence() {
        let mut r = Reassembler::new();
        r.accept(vec![BEGIN_MARKER]).unwrap();
        r.accept(b"stale".to_vec()).unwrap();
        r.accept(vec![BEGIN_MARKER]).unwrap();
        r.accept(b"fresh".to_vec()).unwrap();
        assert_eq!(r.accept(vec![END_MARKER]), Ok(Some(b"fresh".to_vec())));
    }

    #[test]
    fn oversized_document_is_discarded_until_end_marker() {
        let mut r = Reassembler::new().with_max_document_bytes(Some(4));
        r.accept(vec![BEGIN_MARKER]).unwrap();
        r.accept(b"abc".to_vec()).unwrap();
        assert_eq!(
            r.accept(b"de".to_vec()),
            Err(ReassemblyError::Oversized { limit: 4, discarded: 3 })
        );
        assert_eq!(r.accept(b"fg".to_vec()), Ok(None));
        assert_eq!(r.accept(vec![END_MARKER]), Ok(None));
        assert_eq!(r.accept(b"next".to_vec()), Ok(Some(b"next".to_vec())));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_partial_document_expires() {
        let mut r = Reassembler::new().with_deadline(Some(Duration::from_secs(30)));
        r.accept(vec![BEGIN_MARKER]).unwrap();
        r.accept(b"part".to_vec()).unwrap();

        assert_eq!(r.expire_stale(Instant::now()), None);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(r.expire_stale(Instant::now()), Some(4));
        assert!(matches!(r.state(), ReassemblyState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_without_end_marker_expires_and_next_document_flows() {
        let mut r = Reassembler::new()
            .with_max_document_bytes(Some(4))
            .with_deadline(Some(Duration::from_secs(30)));
        r.accept(vec![BEGIN_MARKER]).unwrap();
        assert_eq!(
            r.accept(b"abcde".to_vec()),
            Err(ReassemblyError::Oversized { limit: 4, discarded: 0 })
        );

        // Dropped chunks keep the sequence alive.
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(r.accept(b"fg".to_vec()), Ok(None));
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(r.expire_stale(Instant::now()), None);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(r.expire_stale(Instant::now()), Some(0));
        assert!(matches!(r.state(), ReassemblyState::Idle));
        assert_eq!(
            r.accept(b"next-document".to_vec()),
            Ok(Some(b"next-document".to_vec()))
        );
    }

    #[test]
    fn no_deadline_never_expires() {
        let mut r = Reassembler::new();
        r.accept(vec![BEGIN_MARKER]).unwrap();
        assert_eq!(r.expire_stale(Instant::now() + Duration::from_secs(3600)), None);
    }
}
