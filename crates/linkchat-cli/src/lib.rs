//! LinkChat CLI library
//!
//! Argument parsing, configuration loading and the interactive line chat
//! shared by the `scan` and `advertise` commands.

pub mod chat;
pub mod cli;
pub mod config;
pub mod error;

pub use chat::{parse_input, ChatInput, ChatSession, SnapshotRenderer};
pub use cli::{Cli, Commands};
pub use config::CliConfig;
pub use error::{CliError, Result};
