// Copyright 2026 bleconfd developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Delimiter-framed byte queues between the RPC layer and the GATT session.
//!
//! The outgoing queue is filled from whatever thread the RPC layer runs on and
//! polled by the session's doorbell timer on the reactor thread, so every
//! operation takes the internal lock.

use parking_lot::Mutex;
use std::collections::VecDeque;
use thiserror::Error;

/// Errors returned when appending to the outgoing queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("outgoing queue full: {pending} bytes pending, {requested} requested, limit {limit}")]
    Full {
        pending: usize,
        requested: usize,
        limit: usize,
    },
}

/// Append-only byte stream of delimited records awaiting pickup by the peer.
#[derive(Debug)]
pub struct OutgoingFrameQueue {
    buffer: Mutex<VecDeque<u8>>,
    delimiter: u8,
    limit: usize,
}

impl OutgoingFrameQueue {
    /// Create a queue that separates records with `delimiter` and holds at most
    /// `limit` bytes (delimiters included).
    pub fn new(delimiter: u8, limit: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            delimiter,
            limit,
        }
    }

    /// Append one record followed by the delimiter.
    ///
    /// The record is rejected whole if it would push the queue past its limit;
    /// bytes already queued are never dropped.
    pub fn put_record(&self, record: &[u8]) -> Result<(), QueueError> {
        let mut buffer = self.buffer.lock();
        let requested = record.len() + 1;
        if buffer.len() + requested > self.limit {
            return Err(QueueError::Full {
                pending: buffer.len(),
                requested,
                limit: self.limit,
            });
        }
        buffer.extend(record.iter().copied());
        buffer.push_back(self.delimiter);
        Ok(())
    }

    /// Number of bytes currently queued, delimiters included.
    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Remove and return up to `max` bytes from the head of the queue.
    pub fn take(&self, max: usize) -> Vec<u8> {
        let mut buffer = self.buffer.lock();
        let n = max.min(buffer.len());
        buffer.drain(..n).collect()
    }
}

/// Reassembles delimited records out of arbitrarily split writes.
#[derive(Debug)]
pub struct RecordAssembler {
    partial: Vec<u8>,
    delimiter: u8,
}

impl RecordAssembler {
    pub fn new(delimiter: u8) -> Self {
        Self {
            partial: Vec::new(),
            delimiter,
        }
    }

    /// Feed a chunk and return every record it completed, delimiters stripped.
    /// Empty records (back-to-back delimiters) are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut complete = Vec::new();
        for &byte in chunk {
            if byte == self.delimiter {
                if !self.partial.is_empty() {
                    complete.push(std::mem::take(&mut self.partial));
                }
            } else {
                self.partial.push(byte);
            }
        }
        complete
    }

    /// Bytes received since the last delimiter.
    pub fn buffered(&self) -> usize {
        self.partial.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const DELIM: u8 = 0x1e;

    #[test]
    fn test_pending_counts_delimiters() {
        let queue = OutgoingFrameQueue::new(DELIM, 1024);
        queue.put_record(b"hello").unwrap();
        queue.put_record(b"{}").unwrap();
        queue.put_record(b"x").unwrap();
        assert_eq!(queue.pending(), 5 + 2 + 1 + 3);
    }

    #[test]
    fn test_take_drains_from_head() {
        let queue = OutgoingFrameQueue::new(DELIM, 1024);
        queue.put_record(b"abc").unwrap();
        queue.put_record(b"de").unwrap();

        assert_eq!(queue.take(2), b"ab".to_vec());
        assert_eq!(queue.take(3), vec![b'c', DELIM, b'd']);
        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.take(100), vec![b'e', DELIM]);
        assert!(queue.take(100).is_empty());
    }

    #[test]
    fn test_limit_rejects_whole_record() {
        let queue = OutgoingFrameQueue::new(DELIM, 8);
        queue.put_record(b"abcd").unwrap();
        let err = queue.put_record(b"efgh").unwrap_err();
        assert_eq!(
            err,
            QueueError::Full {
                pending: 5,
                requested: 5,
                limit: 8
            }
        );
        assert_eq!(queue.pending(), 5);

        // Exactly reaching the limit is allowed.
        queue.put_record(b"ef").unwrap();
        assert_eq!(queue.pending(), 8);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(OutgoingFrameQueue::new(DELIM, usize::MAX));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        queue.put_record(b"0123456789").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.pending(), 4 * 250 * 11);
    }

    #[test]
    fn test_assembler_split_records() {
        let mut assembler = RecordAssembler::new(DELIM);
        assert!(assembler.push(b"{\"id\":").is_empty());
        assert_eq!(assembler.buffered(), 6);

        let records = assembler.push(&[b'1', b'}', DELIM, b'{', b'}', DELIM, b'z']);
        assert_eq!(records, vec![b"{\"id\":1}".to_vec(), b"{}".to_vec()]);
        assert_eq!(assembler.buffered(), 1);
    }

    #[test]
    fn test_assembler_skips_empty_records() {
        let mut assembler = RecordAssembler::new(DELIM);
        let records = assembler.push(&[DELIM, DELIM, b'a', DELIM, DELIM]);
        assert_eq!(records, vec![b"a".to_vec()]);
    }
}
