//! Wire-level protocol: fixed identifiers, message values and framing

pub mod constants;
pub mod framing;
pub mod message;

pub use constants::{
    ChannelIdentity, CHAT_CHARACTERISTIC_UUID, CHAT_SERVICE_UUID, DEFAULT_MAX_PAYLOAD,
    EOM_SENTINEL,
};
pub use framing::{FramedPayload, Framing, Reassembler, Reassembly, LENGTH_HEADER_SIZE};
pub use message::{sender_name_of, Message};
