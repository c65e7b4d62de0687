//! Line framing over a ring buffer.
//!
//! [`LineFramer`] accumulates raw bytes read from a log file and cuts them
//! into records terminated by [`RECORD_DELIMITER`]. Records are returned with
//! their delimiter attached.
//!
//! # Overflow
//!
//! The ring has a fixed capacity. Complete records are moved out of the ring
//! as soon as it fills, so buffered bytes are only ever at risk when a single
//! record is longer than the capacity. In that case the framer drops the
//! partial record, skips input up to and including the next delimiter, and
//! reports [`LogError::FramingOverflow`] once the chunk has been consumed.
//! The framer stays usable afterwards.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::{LogError, LogResult};
use crate::ring::RingBuffer;

/// Delimiter terminating every record on disk.
pub const RECORD_DELIMITER: &[u8; 2] = b"\r\n";

/// Cuts a byte stream into delimiter-terminated records.
#[derive(Debug)]
pub struct LineFramer {
    ring: RingBuffer<u8>,
    ready: VecDeque<Bytes>,
    /// Set while discarding the remainder of an oversized record.
    resync: bool,
    /// Last byte seen while resynchronising (delimiter may straddle chunks).
    resync_prev: Option<u8>,
}

impl LineFramer {
    /// Creates a framer whose ring holds `capacity` bytes.
    ///
    /// # Panics
    /// Panics if `capacity` cannot hold a delimiter.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity > RECORD_DELIMITER.len(),
            "framing capacity must exceed the delimiter length"
        );
        Self {
            ring: RingBuffer::new(capacity),
            ready: VecDeque::new(),
            resync: false,
            resync_prev: None,
        }
    }

    /// Returns the ring capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Returns the number of buffered bytes not yet framed into a record.
    #[must_use]
    pub const fn pending(&self) -> usize {
        self.ring.len()
    }

    /// Feeds bytes into the framer.
    ///
    /// The whole slice is always consumed.
    ///
    /// # Errors
    /// Returns [`LogError::FramingOverflow`] if a record longer than the
    /// capacity overflowed the ring while consuming this chunk. Each
    /// oversized record is reported once; whatever is left of it is skipped
    /// silently by later pushes.
    pub fn push(&mut self, mut bytes: &[u8]) -> LogResult<()> {
        let mut dropped = 0u64;
        let mut overflowed = false;

        while !bytes.is_empty() {
            if self.resync {
                let skipped = self.skip_to_delimiter(bytes);
                if overflowed {
                    dropped += skipped as u64;
                }
                bytes = &bytes[skipped..];
                continue;
            }

            let take = self.ring.free().min(bytes.len());
            self.ring.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];

            if self.ring.is_full() {
                self.frame_ready();
                if self.ring.is_full() {
                    // One record fills the whole ring with no delimiter in sight.
                    overflowed = true;
                    dropped += self.ring.len() as u64;
                    self.resync_prev = self.ring.get(self.ring.len() - 1);
                    self.ring.clear();
                    self.resync = true;
                }
            }
        }

        if dropped > 0 {
            return Err(LogError::FramingOverflow {
                capacity: self.ring.capacity(),
                dropped,
            });
        }
        Ok(())
    }

    /// Returns the next complete record, delimiter included.
    pub fn next_record(&mut self) -> Option<Bytes> {
        if let Some(record) = self.ready.pop_front() {
            return Some(record);
        }
        self.cut_record()
    }

    /// Moves every complete record in the ring to the ready queue.
    fn frame_ready(&mut self) {
        while let Some(record) = self.cut_record() {
            self.ready.push_back(record);
        }
    }

    fn cut_record(&mut self) -> Option<Bytes> {
        let end = self.ring.index_of_seq(RECORD_DELIMITER, 0)? + RECORD_DELIMITER.len();
        let record = Bytes::from(self.ring.copy_to_vec(0..end));
        self.ring.remove(end);
        Some(record)
    }

    /// Skips bytes up to and including the next delimiter. Returns the number
    /// of bytes consumed from `bytes`.
    fn skip_to_delimiter(&mut self, bytes: &[u8]) -> usize {
        let [cr, lf] = *RECORD_DELIMITER;
        for (i, &b) in bytes.iter().enumerate() {
            if self.resync_prev == Some(cr) && b == lf {
                self.resync = false;
                self.resync_prev = None;
                return i + 1;
            }
            self.resync_prev = Some(b);
        }
        bytes.len()
    }
}
