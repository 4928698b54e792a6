//! Link protocol configuration
//!
//! Every knob has a default matching the deployed protocol, so
//! `LinkConfig::default()` talks to existing peers.

use serde::{Deserialize, Serialize};

use crate::errors::{LinkError, Result};
use crate::protocol::Framing;

// ----------------------------------------------------------------------------
// Policies
// ----------------------------------------------------------------------------

/// What `send` does while a previous message is still being transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendPolicy {
    /// The new message replaces the in-flight one
    #[default]
    LatestWins,
    /// Messages are transmitted one after another in call order
    Queue,
}

/// How the Responder interprets inbound writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundAssembly {
    /// Reassemble per sender up to the framing boundary
    #[default]
    Reassemble,
    /// Every non-sentinel write is a complete message on its own
    PerWrite,
}

// ----------------------------------------------------------------------------
// Link Configuration
// ----------------------------------------------------------------------------

/// Configuration shared by both role state machines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Message boundary marking on the wire
    pub framing: Framing,
    /// Overwrite or queue on concurrent sends
    pub send_policy: SendPolicy,
    /// Responder handling of inbound writes
    pub inbound_assembly: InboundAssembly,
    /// Initiator resumes discovery after a drop
    pub auto_rescan: bool,
    /// List label for peers that advertise no name
    pub fallback_peer_name: String,
    /// Separator between sender display name and body
    pub name_separator: String,
    /// Number of chat entries kept by the tracker
    pub history_limit: usize,
    /// Largest message accepted in either direction (bytes)
    pub max_message_len: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            framing: Framing::Sentinel,
            send_policy: SendPolicy::LatestWins,
            inbound_assembly: InboundAssembly::Reassemble,
            auto_rescan: true,
            fallback_peer_name: "Unknown room".to_string(),
            name_separator: ": ".to_string(),
            history_limit: 200,
            max_message_len: 64 * 1024,
        }
    }
}

impl LinkConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings interoperable with sentinel-only peers, including the
    /// Responder's one-write-per-message inbound handling and their `"님"`
    /// name separator
    pub fn compatible() -> Self {
        Self {
            inbound_assembly: InboundAssembly::PerWrite,
            name_separator: "님".to_string(),
            ..Self::default()
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_send_policy(mut self, policy: SendPolicy) -> Self {
        self.send_policy = policy;
        self
    }

    pub fn with_inbound_assembly(mut self, assembly: InboundAssembly) -> Self {
        self.inbound_assembly = assembly;
        self
    }

    pub fn with_auto_rescan(mut self, enabled: bool) -> Self {
        self.auto_rescan = enabled;
        self
    }

    pub fn with_fallback_peer_name(mut self, name: impl Into<String>) -> Self {
        self.fallback_peer_name = name.into();
        self
    }

    pub fn with_name_separator(mut self, separator: impl Into<String>) -> Self {
        self.name_separator = separator.into();
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_max_message_len(mut self, len: usize) -> Self {
        self.max_message_len = len;
        self
    }

    /// Reject settings the state machines cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.max_message_len == 0 {
            return Err(LinkError::invalid_config("max_message_len must be positive"));
        }
        if self.framing == Framing::LengthPrefixed && self.max_message_len > u32::MAX as usize {
            return Err(LinkError::invalid_config(
                "max_message_len exceeds the 32-bit length header",
            ));
        }
        if self.history_limit == 0 {
            return Err(LinkError::invalid_config("history_limit must be positive"));
        }
        if self.name_separator.is_empty() {
            return Err(LinkError::invalid_config("name_separator must not be empty"));
        }
        if self.framing == Framing::LengthPrefixed
            && self.inbound_assembly == InboundAssembly::PerWrite
        {
            return Err(LinkError::invalid_config(
                "per-write inbound handling requires sentinel framing",
            ));
        }
        Ok(())
    }
}
