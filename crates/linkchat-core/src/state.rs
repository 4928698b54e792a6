//! Lifecycle and status values observed by the presentation layer

use serde::{Deserialize, Serialize};
use std::fmt;

// ----------------------------------------------------------------------------
// Connection Phase
// ----------------------------------------------------------------------------

/// Where a role instance is in its connection lifecycle
///
/// Exactly one phase holds at a time. The Scanner walks
/// `Scanning → Connecting → DiscoveringChannel → Subscribing → Active`;
/// the Advertiser only uses `Advertising`, `Active` and `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionPhase {
    #[default]
    Idle,
    Scanning,
    Advertising,
    Connecting,
    DiscoveringChannel,
    Subscribing,
    Active,
    Disconnected,
    /// Connection attempt failed before ever reaching `Active`
    Failed,
}

impl ConnectionPhase {
    pub fn state_name(&self) -> &'static str {
        match self {
            ConnectionPhase::Idle => "Idle",
            ConnectionPhase::Scanning => "Scanning",
            ConnectionPhase::Advertising => "Advertising",
            ConnectionPhase::Connecting => "Connecting",
            ConnectionPhase::DiscoveringChannel => "DiscoveringChannel",
            ConnectionPhase::Subscribing => "Subscribing",
            ConnectionPhase::Active => "Active",
            ConnectionPhase::Disconnected => "Disconnected",
            ConnectionPhase::Failed => "Failed",
        }
    }

    /// A link exists or is being set up
    pub fn is_linking(&self) -> bool {
        matches!(
            self,
            ConnectionPhase::Connecting
                | ConnectionPhase::DiscoveringChannel
                | ConnectionPhase::Subscribing
                | ConnectionPhase::Active
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionPhase::Active)
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

// ----------------------------------------------------------------------------
// Radio Availability
// ----------------------------------------------------------------------------

/// Power and permission state of the local radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RadioState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl RadioState {
    pub fn is_powered_on(&self) -> bool {
        matches!(self, RadioState::PoweredOn)
    }

    /// The fault to surface to the user, if this state is one
    pub fn availability_fault(&self) -> Option<AvailabilityFault> {
        match self {
            RadioState::Unauthorized => Some(AvailabilityFault::Unauthorized),
            RadioState::Unsupported => Some(AvailabilityFault::Unsupported),
            RadioState::PoweredOff => Some(AvailabilityFault::PoweredOff),
            _ => None,
        }
    }
}

/// Why the radio cannot be used right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvailabilityFault {
    Unauthorized,
    Unsupported,
    PoweredOff,
    /// An operation needed the radio before it reported a usable state
    NotReady,
}

// ----------------------------------------------------------------------------
// Status Values
// ----------------------------------------------------------------------------

/// Outcome of the most recent link lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectStatus {
    #[default]
    None,
    Success,
    Fail,
    Disconnected {
        user_name: Option<String>,
    },
    Subscribed,
}

/// Outcome of the most recent message exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChatStatus {
    #[default]
    None,
    SuccessToSend,
    FailToSend,
}
