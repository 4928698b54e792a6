//! Error types for the link protocol core
//!
//! Role operations never fail across their public boundary; they report
//! through the connection tracker instead. The errors here cover the few
//! places that do return `Result`: configuration validation, identifier
//! parsing and loading an outbound message. Inbound framing problems are
//! reported as [`crate::protocol::Reassembly::Discarded`], not as errors.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised by the link protocol core
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("Invalid endpoint identifier: {value}")]
    InvalidEndpoint { value: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },
}

impl LinkError {
    /// Shorthand for configuration errors
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

/// Result alias used across the core crate
pub type Result<T> = core::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_render_fields() {
        let err = LinkError::MessageTooLarge {
            size: 10,
            max_size: 4,
        };
        assert_eq!(err.to_string(), "Message too large: 10 bytes (max: 4)");

        let err = LinkError::invalid_config("mtu must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: mtu must be positive"
        );
    }

    #[test]
    fn endpoint_parse_errors_name_the_input() {
        let err = "not-a-uuid".parse::<crate::types::EndpointId>().unwrap_err();
        assert!(matches!(err, LinkError::InvalidEndpoint { ref value } if value == "not-a-uuid"));
    }
}
