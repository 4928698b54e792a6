//! Error types for the BLE drivers

use linkchat_core::LinkError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while bringing up or running a radio driver
///
/// Link-level failures after start-up are not errors: they reach the role
/// state machine as events and surface through the tracker.
#[derive(Error, Debug)]
pub enum BleLinkError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    #[cfg(target_os = "linux")]
    #[error("BlueZ error: {0}")]
    BlueZ(#[from] bluer::Error),

    #[error("Failed to get BLE events: {0}")]
    EventStreamFailed(String),

    #[error("Invalid BLE configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("Peripheral role is not supported on this platform")]
    PeripheralUnsupported,

    #[error("Link driver has stopped")]
    LinkClosed,

    #[error(transparent)]
    Link(#[from] LinkError),
}

pub type Result<T> = std::result::Result<T, BleLinkError>;
