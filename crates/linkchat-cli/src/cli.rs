//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Scan for rooms and join one (Initiator role)
    Scan {
        /// Connect to the first room discovered
        #[arg(long)]
        connect_first: bool,
        /// Your display name
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Host a room others can join (Responder role)
    Advertise {
        /// Room label to advertise
        #[arg(short, long)]
        room: Option<String>,
        /// Your display name
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scan_flags() {
        let cli = Cli::parse_from(["linkchat", "scan", "--connect-first", "-n", "ada"]);
        assert_eq!(
            cli.command,
            Commands::Scan {
                connect_first: true,
                name: Some("ada".to_string()),
            }
        );
        assert!(!cli.verbose);
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::parse_from(["linkchat", "advertise", "--room", "Lobby", "-v", "-c", "chat.toml"]);
        assert!(cli.verbose);
        assert_eq!(cli.config.as_deref(), Some("chat.toml"));
        assert_eq!(
            cli.command,
            Commands::Advertise {
                room: Some("Lobby".to_string()),
                name: None,
            }
        );
    }
}
