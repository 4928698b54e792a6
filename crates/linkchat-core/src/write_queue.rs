//! Bounded transmit queue bridging the engine to an async radio driver
//!
//! The engine writes into the queue synchronously; the driver pops chunks,
//! hands them to the radio and, once a refused write left room behind,
//! raises `WriteCapacityAvailable` so the engine resumes.

use std::collections::VecDeque;

use crate::protocol::DEFAULT_MAX_PAYLOAD;
use crate::transfer::{ChunkSink, WriteOutcome};

#[derive(Debug, Clone)]
pub struct WriteQueue {
    pending: VecDeque<Vec<u8>>,
    capacity: usize,
    max_payload: usize,
    saturated: bool,
}

impl WriteQueue {
    /// Queue holding at most `capacity` chunks (at least one)
    pub fn new(capacity: usize, max_payload: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            max_payload: max_payload.max(1),
            saturated: false,
        }
    }

    /// Apply a newly negotiated payload size to subsequent writes
    pub fn set_max_payload(&mut self, max_payload: usize) {
        self.max_payload = max_payload.max(1);
    }

    /// Next chunk for the radio, in write order
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.pending.pop_front()
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True once per refused write, after room has been made
    ///
    /// The driver raises `WriteCapacityAvailable` when this returns true.
    pub fn resume_needed(&mut self) -> bool {
        if self.saturated && !self.is_full() {
            self.saturated = false;
            return true;
        }
        false
    }

    /// Drop chunks not yet handed to the radio
    pub fn clear(&mut self) {
        self.pending.clear();
        self.saturated = false;
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new(8, DEFAULT_MAX_PAYLOAD)
    }
}

impl ChunkSink for WriteQueue {
    fn max_payload_len(&self) -> usize {
        self.max_payload
    }

    fn try_write(&mut self, chunk: &[u8]) -> WriteOutcome {
        if self.is_full() {
            self.saturated = true;
            return WriteOutcome::Busy;
        }
        self.pending.push_back(chunk.to_vec());
        WriteOutcome::Accepted
    }

    fn discard_pending(&mut self) {
        self.clear();
    }
}
