//! BLE driver configuration

use std::time::Duration;

use linkchat_core::{DEFAULT_MAX_PAYLOAD, EOM_SENTINEL};

use crate::error::{BleLinkError, Result};

/// ATT header bytes subtracted from the negotiated MTU for a write payload
pub const ATT_HEADER_SIZE: usize = 3;

/// Largest write payload for a negotiated ATT MTU
pub fn payload_for_att_mtu(att_mtu: u16) -> usize {
    (att_mtu as usize).saturating_sub(ATT_HEADER_SIZE).max(1)
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the BLE drivers
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BleLinkConfig {
    /// Which adapter to use when several are present
    pub adapter_index: usize,
    /// Upper bound on a connection attempt; `None` relies on the stack
    pub connect_timeout: Option<Duration>,
    /// Upper bound on service and characteristic discovery
    pub channel_discovery_timeout: Option<Duration>,
    /// Write payload used until the stack reports a negotiated MTU
    pub default_max_payload: usize,
    /// Chunks accepted before the transfer engine is told to wait
    pub write_queue_depth: usize,
    /// Capacity of the command and internal event channels
    pub event_buffer: usize,
}

impl Default for BleLinkConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            connect_timeout: Some(Duration::from_secs(10)),
            channel_discovery_timeout: Some(Duration::from_secs(10)),
            default_max_payload: DEFAULT_MAX_PAYLOAD,
            write_queue_depth: 8,
            event_buffer: 64,
        }
    }
}

impl BleLinkConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the adapter by position
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set channel discovery timeout
    pub fn with_channel_discovery_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.channel_discovery_timeout = timeout;
        self
    }

    /// Set the fallback write payload
    pub fn with_default_max_payload(mut self, size: usize) -> Self {
        self.default_max_payload = size;
        self
    }

    /// Set the transmit queue depth
    pub fn with_write_queue_depth(mut self, depth: usize) -> Self {
        self.write_queue_depth = depth;
        self
    }

    pub fn with_event_buffer(mut self, size: usize) -> Self {
        self.event_buffer = size;
        self
    }

    /// Reject settings the drivers cannot run with
    pub fn validate(&self) -> Result<()> {
        // The sentinel must fit in a single write
        if self.default_max_payload < EOM_SENTINEL.len() {
            return Err(BleLinkError::InvalidConfiguration {
                reason: format!(
                    "default_max_payload must be at least {} bytes",
                    EOM_SENTINEL.len()
                ),
            });
        }
        if self.write_queue_depth == 0 {
            return Err(BleLinkError::InvalidConfiguration {
                reason: "write_queue_depth must be positive".to_string(),
            });
        }
        if self.event_buffer == 0 {
            return Err(BleLinkError::InvalidConfiguration {
                reason: "event_buffer must be positive".to_string(),
            });
        }
        Ok(())
    }
}
