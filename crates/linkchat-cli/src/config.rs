//! LinkChat CLI Configuration
//!
//! A single TOML file, every section optional:
//!
//! ```toml
//! display_name = "ada"
//! room_label = "Lobby"
//!
//! [link]
//! send_policy = "queue"
//!
//! [ble]
//! write_queue_depth = 16
//! ```
//!
//! Command line flags override the file.

use std::path::Path;

use linkchat_ble::BleLinkConfig;
use linkchat_core::LinkConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Name prefixed to every line this side sends
    pub display_name: String,
    /// Label advertised by the `advertise` command
    pub room_label: String,
    /// Role state machine settings
    pub link: LinkConfig,
    /// Radio driver settings
    pub ble: BleLinkConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            display_name: "Anonymous".to_string(),
            room_label: "LinkChat".to_string(),
            link: LinkConfig::default(),
            ble: BleLinkConfig::default(),
        }
    }
}

impl CliConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: CliConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command line overrides
    pub fn with_overrides(mut self, name: Option<String>, room: Option<String>) -> Result<Self> {
        if let Some(name) = name {
            self.display_name = name;
        }
        if let Some(room) = room {
            self.room_label = room;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.link.validate()?;
        self.ble.validate()?;
        if self.display_name.trim().is_empty() {
            return Err(CliError::Config("display_name must not be empty".to_string()));
        }
        // A separator inside the name would shift the sender/body split
        if self.display_name.contains(self.link.name_separator.as_str()) {
            return Err(CliError::Config(format!(
                "display_name must not contain the separator {:?}",
                self.link.name_separator
            )));
        }
        if self.room_label.trim().is_empty() {
            return Err(CliError::Config("room_label must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use linkchat_core::SendPolicy;

    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(CliConfig::default().validate().is_ok());
    }

    #[test]
    fn loads_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "display_name = \"ada\"\n\n[link]\nsend_policy = \"queue\"\n\n[ble]\nwrite_queue_depth = 16"
        )
        .unwrap();

        let config = CliConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.display_name, "ada");
        assert_eq!(config.room_label, "LinkChat");
        assert_eq!(config.link.send_policy, SendPolicy::Queue);
        assert_eq!(config.ble.write_queue_depth, 16);
        assert_eq!(config.ble.adapter_index, 0);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = CliConfig::load_from_file("/nonexistent/linkchat.toml").unwrap_err();
        assert!(matches!(err, CliError::Io(_)));
    }

    #[test]
    fn overrides_replace_file_values() {
        let config = CliConfig::default()
            .with_overrides(Some("grace".to_string()), Some("Den".to_string()))
            .unwrap();
        assert_eq!(config.display_name, "grace");
        assert_eq!(config.room_label, "Den");
    }

    #[test]
    fn rejects_separator_in_name() {
        let err = CliConfig::default()
            .with_overrides(Some("a: b".to_string()), None)
            .unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }
}
