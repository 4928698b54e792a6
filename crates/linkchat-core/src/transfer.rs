//! Chunked transfer engine
//!
//! Splits an outbound message into writes no larger than the link's current
//! maximum payload and appends the framing trailer as an isolated final
//! write. No data chunk is ever identical to that trailer. The engine
//! suspends whenever the link refuses a write, and a later
//! `WriteCapacityAvailable` resumes from the exact byte where it stopped.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::SendPolicy;
use crate::errors::{LinkError, Result};
use crate::protocol::{Framing, Message};

// ----------------------------------------------------------------------------
// Sink Contract
// ----------------------------------------------------------------------------

/// Whether the link took a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    /// Transmit queue full; retry after the link signals readiness
    Busy,
}

/// The link-side write primitive the engine drives
///
/// `max_payload_len` is queried before every write because the negotiated
/// size may change for the lifetime of a connection.
pub trait ChunkSink {
    fn max_payload_len(&self) -> usize;
    fn try_write(&mut self, chunk: &[u8]) -> WriteOutcome;

    /// Forget accepted writes not yet on the air (the target endpoint left)
    fn discard_pending(&mut self) {}
}

// ----------------------------------------------------------------------------
// Outbound Buffer
// ----------------------------------------------------------------------------

/// Bytes of one message pending transmission plus the transmit cursor
#[derive(Debug, Clone)]
pub struct OutboundBuffer {
    text: String,
    data: Vec<u8>,
    send_index: usize,
    trailer: Option<&'static [u8]>,
    sending_sentinel: bool,
}

impl OutboundBuffer {
    fn new(text: String, framing: Framing) -> Self {
        let framed = framing.encode(text.as_bytes());
        Self {
            text,
            data: framed.data,
            send_index: 0,
            trailer: framed.trailer,
            sending_sentinel: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Data bytes already handed to the link
    pub fn send_index(&self) -> usize {
        self.send_index
    }

    /// Total data bytes (trailer excluded)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Only the trailer remains to be written
    pub fn is_sending_sentinel(&self) -> bool {
        self.sending_sentinel
    }
}

// ----------------------------------------------------------------------------
// Drain Report
// ----------------------------------------------------------------------------

/// What one drain pass achieved
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Writes the link accepted during this pass
    pub writes: usize,
    /// Messages whose final write was accepted, in completion order
    pub completed: Vec<Message>,
    /// The pass stopped on a `Busy` write
    pub suspended: bool,
}

/// A transfer dropped before completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortedTransfer {
    pub text: String,
    pub bytes_sent: usize,
    pub queued_dropped: usize,
}

// ----------------------------------------------------------------------------
// Transfer Engine
// ----------------------------------------------------------------------------

/// Fragmentation and flow control for one role instance
///
/// Owned exclusively by its role; `&mut self` on `drain` guarantees at most
/// one drain is in flight for the buffer.
#[derive(Debug)]
pub struct TransferEngine {
    framing: Framing,
    policy: SendPolicy,
    max_message_len: usize,
    active: Option<OutboundBuffer>,
    queued: VecDeque<String>,
}

impl TransferEngine {
    pub fn new(framing: Framing, policy: SendPolicy, max_message_len: usize) -> Self {
        Self {
            framing,
            policy,
            max_message_len,
            active: None,
            queued: VecDeque::new(),
        }
    }

    /// Load a new outbound message
    ///
    /// Under [`SendPolicy::LatestWins`] any in-flight message is replaced and
    /// its cursor reset; under [`SendPolicy::Queue`] the text waits its turn.
    pub fn begin(&mut self, text: String) -> Result<()> {
        if text.len() > self.max_message_len {
            return Err(LinkError::MessageTooLarge {
                size: text.len(),
                max_size: self.max_message_len,
            });
        }

        match self.policy {
            SendPolicy::LatestWins => {
                if let Some(previous) = &self.active {
                    debug!(
                        sent = previous.send_index,
                        total = previous.len(),
                        "replacing in-flight message"
                    );
                }
                self.active = Some(OutboundBuffer::new(text, self.framing));
            }
            SendPolicy::Queue => {
                if self.active.is_some() {
                    self.queued.push_back(text);
                } else {
                    self.active = Some(OutboundBuffer::new(text, self.framing));
                }
            }
        }
        Ok(())
    }

    /// Write as much as the sink accepts
    ///
    /// Safe to call at any time: with nothing pending it is a no-op, so a
    /// readiness signal arriving after the buffer already finished does
    /// nothing.
    pub fn drain(&mut self, sink: &mut dyn ChunkSink) -> DrainReport {
        let mut report = DrainReport::default();

        while let Some(buffer) = self.active.as_mut() {
            if !buffer.sending_sentinel {
                while buffer.send_index < buffer.data.len() {
                    let max = sink.max_payload_len().max(1);
                    let mut end = (buffer.send_index + max).min(buffer.data.len());
                    // A data chunk equal to the trailer would end the message early
                    if buffer.trailer == Some(&buffer.data[buffer.send_index..end]) {
                        end -= 1;
                    }
                    let chunk = &buffer.data[buffer.send_index..end];
                    match sink.try_write(chunk) {
                        WriteOutcome::Accepted => {
                            debug!(
                                bytes = chunk.len(),
                                offset = buffer.send_index,
                                "wrote chunk"
                            );
                            buffer.send_index = end;
                            report.writes += 1;
                        }
                        WriteOutcome::Busy => {
                            debug!(offset = buffer.send_index, "link busy, suspending");
                            report.suspended = true;
                            return report;
                        }
                    }
                }
                buffer.sending_sentinel = buffer.trailer.is_some();
            }

            if let Some(trailer) = buffer.trailer.filter(|_| buffer.sending_sentinel) {
                match sink.try_write(trailer) {
                    WriteOutcome::Accepted => {
                        debug!("wrote end-of-message sentinel");
                        buffer.sending_sentinel = false;
                        report.writes += 1;
                    }
                    WriteOutcome::Busy => {
                        debug!("link busy, sentinel pending");
                        report.suspended = true;
                        return report;
                    }
                }
            }

            if let Some(done) = self.active.take() {
                report.completed.push(Message::new(done.text));
            }
            self.active = self
                .queued
                .pop_front()
                .map(|text| OutboundBuffer::new(text, self.framing));
        }

        report
    }

    /// Drop the in-flight message and anything queued behind it
    pub fn abort(&mut self) -> Option<AbortedTransfer> {
        let queued_dropped = self.queued.len();
        self.queued.clear();
        self.active.take().map(|buffer| AbortedTransfer {
            bytes_sent: buffer.send_index,
            text: buffer.text,
            queued_dropped,
        })
    }

    /// Nothing in flight and nothing queued
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queued.is_empty()
    }

    pub fn active(&self) -> Option<&OutboundBuffer> {
        self.active.as_ref()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }
}
