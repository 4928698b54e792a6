//! Fixed protocol identifiers shared by both roles

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// Chat service UUID advertised by the Responder
pub const CHAT_SERVICE_UUID: Uuid = Uuid::from_u128(0xE20A39F4_73F5_4BC4_A12F_17D1AD07A961);

/// The single characteristic used for writes (Initiator → Responder) and
/// notifications (Responder → Initiator)
pub const CHAT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x08590F7E_DB05_467E_8757_72F6FAEB13D4);

/// End-of-message token, always written on its own
pub const EOM_SENTINEL: &[u8] = b"EOM";

/// Payload size assumed before a link reports its own (ATT default MTU minus header)
pub const DEFAULT_MAX_PAYLOAD: usize = 20;

// ----------------------------------------------------------------------------
// Channel Identity
// ----------------------------------------------------------------------------

/// The service/characteristic pair both roles must agree on bit for bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelIdentity {
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
}

impl ChannelIdentity {
    /// The chat channel
    pub const CHAT: ChannelIdentity = ChannelIdentity {
        service_id: CHAT_SERVICE_UUID,
        characteristic_id: CHAT_CHARACTERISTIC_UUID,
    };

    /// Whether a discovered (service, characteristic) pair is this channel
    pub fn matches(&self, service_id: &Uuid, characteristic_id: &Uuid) -> bool {
        self.service_id == *service_id && self.characteristic_id == *characteristic_id
    }
}

impl Default for ChannelIdentity {
    fn default() -> Self {
        Self::CHAT
    }
}
