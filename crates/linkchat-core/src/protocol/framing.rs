//! Message framing on the chat characteristic
//!
//! Two framings are supported:
//!
//! - [`Framing::Sentinel`] – the payload bytes followed by a separate write
//!   carrying exactly [`EOM_SENTINEL`]. This is the deployed wire format.
//!   Any write that is exactly `"EOM"` terminates, so senders must never cut
//!   a data chunk equal to it (see [`crate::transfer::TransferEngine`]).
//! - [`Framing::LengthPrefixed`] – a 4-byte big-endian length header followed
//!   by the payload, no terminator. Payload bytes never need special
//!   chunking, but sentinel-only peers do not understand it.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::protocol::constants::EOM_SENTINEL;
use crate::protocol::message::Message;

/// Size of the length header used by [`Framing::LengthPrefixed`]
pub const LENGTH_HEADER_SIZE: usize = 4;

// ----------------------------------------------------------------------------
// Framing Mode
// ----------------------------------------------------------------------------

/// How message boundaries are marked on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    #[default]
    Sentinel,
    LengthPrefixed,
}

/// An outbound message laid out for chunking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedPayload {
    /// Bytes to be split into MTU-sized data writes
    pub data: Vec<u8>,
    /// Isolated trailer write, if the framing needs one
    pub trailer: Option<&'static [u8]>,
}

impl Framing {
    /// Lay out `payload` for transmission
    pub fn encode(&self, payload: &[u8]) -> FramedPayload {
        match self {
            Framing::Sentinel => FramedPayload {
                data: payload.to_vec(),
                trailer: Some(EOM_SENTINEL),
            },
            Framing::LengthPrefixed => {
                let mut data = Vec::with_capacity(LENGTH_HEADER_SIZE + payload.len());
                data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                data.extend_from_slice(payload);
                FramedPayload {
                    data,
                    trailer: None,
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Reassembly
// ----------------------------------------------------------------------------

/// Result of feeding one inbound chunk to a [`Reassembler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// More chunks are needed
    Pending,
    /// A message boundary was reached and the payload decoded
    Complete(Message),
    /// A message boundary was reached but the payload was dropped
    /// (not UTF-8, or larger than the configured limit)
    Discarded,
}

/// Accumulates inbound chunks until a message boundary
#[derive(Debug, Clone)]
pub struct Reassembler {
    framing: Framing,
    buffer: Vec<u8>,
    max_len: usize,
    overflowed: bool,
    /// Body bytes of a rejected length-prefixed frame still to be skipped
    skip_remaining: usize,
}

impl Reassembler {
    pub fn new(framing: Framing, max_len: usize) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
            max_len,
            overflowed: false,
            skip_remaining: 0,
        }
    }

    /// Feed one chunk exactly as it arrived from the link
    pub fn push(&mut self, chunk: &[u8]) -> Reassembly {
        match self.framing {
            Framing::Sentinel => self.push_sentinel(chunk),
            Framing::LengthPrefixed => self.push_length_prefixed(chunk),
        }
    }

    /// Drop any partially received bytes
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
        self.skip_remaining = 0;
    }

    /// Bytes held since the last boundary
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn push_sentinel(&mut self, chunk: &[u8]) -> Reassembly {
        if chunk == EOM_SENTINEL {
            let overflowed = std::mem::replace(&mut self.overflowed, false);
            let bytes = std::mem::take(&mut self.buffer);
            if overflowed {
                debug!("dropping oversized message at sentinel");
                return Reassembly::Discarded;
            }
            return decode(bytes);
        }

        if self.overflowed {
            return Reassembly::Pending;
        }
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > self.max_len {
            warn!(
                bytes = self.buffer.len(),
                max = self.max_len,
                "inbound message exceeds limit, discarding until sentinel"
            );
            self.buffer.clear();
            self.overflowed = true;
        }
        Reassembly::Pending
    }

    fn push_length_prefixed(&mut self, chunk: &[u8]) -> Reassembly {
        let skipped = self.skip_remaining.min(chunk.len());
        self.skip_remaining -= skipped;
        let chunk = &chunk[skipped..];
        if chunk.is_empty() {
            return Reassembly::Pending;
        }

        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() < LENGTH_HEADER_SIZE {
            return Reassembly::Pending;
        }

        let mut header = [0u8; LENGTH_HEADER_SIZE];
        header.copy_from_slice(&self.buffer[..LENGTH_HEADER_SIZE]);
        let declared = u32::from_be_bytes(header) as usize;
        if declared > self.max_len {
            warn!(declared, max = self.max_len, "frame header exceeds limit, skipping body");
            let body = self.buffer.len() - LENGTH_HEADER_SIZE;
            if body >= declared {
                self.buffer.drain(..LENGTH_HEADER_SIZE + declared);
            } else {
                self.skip_remaining = declared - body;
                self.buffer.clear();
            }
            return Reassembly::Discarded;
        }

        let frame_len = LENGTH_HEADER_SIZE + declared;
        if self.buffer.len() < frame_len {
            return Reassembly::Pending;
        }

        let rest = self.buffer.split_off(frame_len);
        let frame = std::mem::replace(&mut self.buffer, rest);
        decode(frame[LENGTH_HEADER_SIZE..].to_vec())
    }
}

fn decode(bytes: Vec<u8>) -> Reassembly {
    match String::from_utf8(bytes) {
        Ok(text) => Reassembly::Complete(Message::new(text)),
        Err(e) => {
            debug!("dropping message that is not UTF-8: {}", e);
            Reassembly::Discarded
        }
    }
}
