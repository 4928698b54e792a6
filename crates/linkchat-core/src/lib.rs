//! LinkChat Core
//!
//! Sans-I/O implementation of a two-role chat link over a radio channel that
//! only carries small, MTU-bounded writes. The Initiator ([`Scanner`])
//! discovers, connects and subscribes; the Responder ([`Advertiser`])
//! publishes the channel and relays chat lines. Both fragment outbound text
//! through the [`TransferEngine`], honour backpressure from a [`ChunkSink`]
//! and publish their observable state through a [`ConnectionTracker`].
//!
//! Radio callbacks are fed in as events and the radio operations to perform
//! come back as effects, so both state machines run unchanged under a real
//! BLE stack or an in-memory test harness.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod advertiser;
pub mod config;
pub mod errors;
pub mod protocol;
pub mod scanner;
pub mod state;
pub mod tracker;
pub mod transfer;
pub mod types;
pub mod write_queue;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use advertiser::{Advertiser, AdvertiserEffect, AdvertiserEffects, AdvertiserEvent};
pub use config::{InboundAssembly, LinkConfig, SendPolicy};
pub use errors::{LinkError, Result};
pub use protocol::{
    ChannelIdentity, Framing, Message, Reassembler, Reassembly, CHAT_CHARACTERISTIC_UUID,
    CHAT_SERVICE_UUID, DEFAULT_MAX_PAYLOAD, EOM_SENTINEL,
};
pub use scanner::{ChannelLookup, Scanner, ScannerEffect, ScannerEffects, ScannerEvent};
pub use state::{AvailabilityFault, ChatStatus, ConnectStatus, ConnectionPhase, RadioState};
pub use tracker::{ChatEntry, ConnectionTracker, Direction, DiscoveredPeer, LinkSnapshot};
pub use transfer::{
    AbortedTransfer, ChunkSink, DrainReport, OutboundBuffer, TransferEngine, WriteOutcome,
};
pub use types::{EndpointId, Timestamp};
pub use write_queue::WriteQueue;
