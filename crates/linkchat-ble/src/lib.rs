//! LinkChat BLE Drivers
//!
//! Binds the role state machines from `linkchat-core` to real radios:
//!
//! - [`CentralLink`]: Initiator role over btleplug (scan, connect, write)
//! - `PeripheralLink`: Responder role over BlueZ (serve, advertise, notify),
//!   available on Linux only
//!
//! Both drivers run on one task and are controlled through a [`LinkHandle`].

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod central;
pub mod config;
pub mod error;
pub mod handle;
#[cfg(target_os = "linux")]
pub mod peripheral;

// ----------------------------------------------------------------------------
// Public API Re-exports
// ----------------------------------------------------------------------------

pub use central::CentralLink;
pub use config::{payload_for_att_mtu, BleLinkConfig, ATT_HEADER_SIZE};
pub use error::{BleLinkError, Result};
pub use handle::{LinkCommand, LinkDriver, LinkHandle};
#[cfg(target_os = "linux")]
pub use peripheral::PeripheralLink;
