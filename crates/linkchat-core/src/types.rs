//! Core value types shared by both link roles
//!
//! Newtype wrappers keep remote handles and wall-clock stamps from being
//! confused with plain integers or strings.

use core::fmt;
use core::ops::Sub;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::LinkError;

// ----------------------------------------------------------------------------
// Remote Endpoint
// ----------------------------------------------------------------------------

/// Opaque handle to a remote peer on the radio link
///
/// Drivers mint one per radio-level identity (a btleplug peripheral id, a
/// BlueZ device address) and keep the mapping themselves; the core only
/// compares handles for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId(Uuid);

impl EndpointId {
    /// Mint a fresh random handle
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Deterministic handle from a small integer (handy for tests and mocks)
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell peers apart in logs
        let simple = self.0.simple().to_string();
        write!(f, "{}", &simple[..8])
    }
}

impl FromStr for EndpointId {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| LinkError::InvalidEndpoint {
                value: s.to_string(),
            })
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Milliseconds since the UNIX epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> core::time::Duration {
        core::time::Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_display_is_short() {
        let id = EndpointId::from_u128(0xabcdef01_0000_0000_0000_000000000000);
        assert_eq!(id.to_string(), "abcdef01");
    }

    #[test]
    fn endpoint_parse_roundtrip() {
        let id = EndpointId::random();
        let parsed: EndpointId = id.as_uuid().to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<EndpointId>().is_err());
    }

    #[test]
    fn timestamp_subtraction_saturates() {
        let early = Timestamp::new(10);
        let late = Timestamp::new(25);
        assert_eq!(late - early, 15);
        assert_eq!(early - late, 0);
        assert_eq!(late.duration_since(early).as_millis(), 15);
    }
}
