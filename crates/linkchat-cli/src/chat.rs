//! Interactive line chat
//!
//! Reads lines from stdin and forwards them to the link; prints whatever the
//! tracker reports (phase changes, discovered rooms, chat lines) as it
//! changes.

use linkchat_ble::LinkHandle;
use linkchat_core::{
    AvailabilityFault, ChatEntry, ChatStatus, ConnectStatus, ConnectionPhase, DiscoveredPeer,
    Direction, LinkSnapshot, Message,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::config::CliConfig;
use crate::error::Result;

// ----------------------------------------------------------------------------
// Input Parsing
// ----------------------------------------------------------------------------

/// One line typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Say(String),
    Peers,
    /// Zero-based index into the discovered room list
    Connect(usize),
    Stop,
    Quit,
    Empty,
}

/// Parse a line; slash commands are `/peers`, `/connect <n>`, `/stop` and `/quit`
pub fn parse_input(line: &str) -> std::result::Result<ChatInput, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(ChatInput::Empty);
    }

    let Some(command) = line.strip_prefix('/') else {
        return Ok(ChatInput::Say(line.to_string()));
    };

    let mut words = command.split_whitespace();
    match words.next().unwrap_or_default() {
        "peers" | "rooms" => Ok(ChatInput::Peers),
        "connect" | "join" => {
            let position = words
                .next()
                .ok_or_else(|| "usage: /connect <number>".to_string())?;
            match position.parse::<usize>() {
                Ok(n) if n >= 1 => Ok(ChatInput::Connect(n - 1)),
                _ => Err(format!("not a room number: {}", position)),
            }
        }
        "stop" => Ok(ChatInput::Stop),
        "quit" | "exit" => Ok(ChatInput::Quit),
        other => Err(format!("unknown command: /{}", other)),
    }
}

// ----------------------------------------------------------------------------
// Snapshot Rendering
// ----------------------------------------------------------------------------

/// Turns successive snapshots into the lines that changed
#[derive(Debug, Default)]
pub struct SnapshotRenderer {
    phase: Option<ConnectionPhase>,
    connect_status: ConnectStatus,
    chat_status: ChatStatus,
    fault: Option<AvailabilityFault>,
    peers_shown: usize,
    last_seq: Option<u64>,
}

impl SnapshotRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, snapshot: &LinkSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if snapshot.fault != self.fault {
            if let Some(fault) = snapshot.fault {
                lines.push(format!("! bluetooth unavailable: {}", describe_fault(fault)));
            }
            self.fault = snapshot.fault;
        }

        if self.phase != Some(snapshot.phase) {
            lines.push(format!("* {}", snapshot.phase));
            self.phase = Some(snapshot.phase);
        }

        if snapshot.connect_status != self.connect_status {
            match &snapshot.connect_status {
                ConnectStatus::Fail => lines.push("! connection failed".to_string()),
                ConnectStatus::Disconnected {
                    user_name: Some(name),
                } => lines.push(format!("* {} left", name)),
                ConnectStatus::Subscribed => lines.push("* joined".to_string()),
                _ => {}
            }
            self.connect_status = snapshot.connect_status.clone();
        }

        if snapshot.chat_status != self.chat_status {
            if snapshot.chat_status == ChatStatus::FailToSend {
                lines.push("! message not sent".to_string());
            }
            self.chat_status = snapshot.chat_status;
        }

        if snapshot.peers.len() < self.peers_shown {
            self.peers_shown = 0;
        }
        for (index, peer) in snapshot.peers.iter().enumerate().skip(self.peers_shown) {
            lines.push(format_peer(index, peer));
        }
        self.peers_shown = snapshot.peers.len();

        let last_seq = self.last_seq;
        for entry in snapshot
            .history
            .iter()
            .filter(|entry| last_seq.map_or(true, |seen| entry.seq > seen))
        {
            lines.push(format_entry(entry));
            self.last_seq = Some(entry.seq);
        }

        lines
    }
}

fn describe_fault(fault: AvailabilityFault) -> &'static str {
    match fault {
        AvailabilityFault::Unauthorized => "permission denied",
        AvailabilityFault::Unsupported => "not supported on this device",
        AvailabilityFault::PoweredOff => "adapter is powered off",
        AvailabilityFault::NotReady => "adapter is not ready yet",
    }
}

fn format_peer(index: usize, peer: &DiscoveredPeer) -> String {
    match peer.rssi {
        Some(rssi) => format!("  [{}] {} ({} dBm)", index + 1, peer.name, rssi),
        None => format!("  [{}] {}", index + 1, peer.name),
    }
}

fn format_entry(entry: &ChatEntry) -> String {
    match entry.direction {
        Direction::Sent => format!("> {}", entry.message.text()),
        Direction::Received => format!("< {}", entry.message.text()),
    }
}

// ----------------------------------------------------------------------------
// Chat Session
// ----------------------------------------------------------------------------

pub struct ChatSession {
    handle: LinkHandle,
    display_name: String,
    separator: String,
    connect_first: bool,
}

impl ChatSession {
    pub fn new(handle: LinkHandle, config: &CliConfig) -> Self {
        Self {
            handle,
            display_name: config.display_name.clone(),
            separator: config.link.name_separator.clone(),
            connect_first: false,
        }
    }

    /// Join the first room that shows up
    pub fn with_connect_first(mut self, enabled: bool) -> Self {
        self.connect_first = enabled;
        self
    }

    /// Run until stdin closes, `/quit` is typed or the driver exits
    pub async fn run(self) -> Result<()> {
        let mut state = self.handle.subscribe();
        let mut renderer = SnapshotRenderer::new();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut auto_connected = false;

        for line in renderer.render(&state.borrow_and_update()) {
            println!("{}", line);
        }

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("stdin closed");
                        break;
                    };
                    let peers = state.borrow().peers.clone();
                    if !self.on_line(&line, &peers).await? {
                        break;
                    }
                }

                changed = state.changed() => {
                    if changed.is_err() {
                        info!("link driver exited");
                        break;
                    }
                    let snapshot = state.borrow_and_update().clone();
                    for line in renderer.render(&snapshot) {
                        println!("{}", line);
                    }
                    if self.connect_first && !auto_connected && snapshot.phase == ConnectionPhase::Scanning {
                        if let Some(first) = snapshot.peers.first() {
                            info!(room = %first.name, "joining first room");
                            self.handle.connect(first.id).await?;
                            auto_connected = true;
                        }
                    }
                }
            }
        }

        // The driver may already be gone
        let _ = self.handle.shutdown().await;
        Ok(())
    }

    /// Returns false when the user asked to quit
    async fn on_line(&self, line: &str, peers: &[DiscoveredPeer]) -> Result<bool> {
        match parse_input(line) {
            Ok(ChatInput::Say(body)) => {
                let message = Message::compose(&self.display_name, &self.separator, &body);
                self.handle.send(message.into_text()).await?;
            }
            Ok(ChatInput::Peers) => {
                if peers.is_empty() {
                    println!("* no rooms found yet");
                }
                for (index, peer) in peers.iter().enumerate() {
                    println!("{}", format_peer(index, peer));
                }
            }
            Ok(ChatInput::Connect(index)) => match peers.get(index) {
                Some(peer) => self.handle.connect(peer.id).await?,
                None => println!("! no room number {}", index + 1),
            },
            Ok(ChatInput::Stop) => self.handle.stop().await?,
            Ok(ChatInput::Quit) => return Ok(false),
            Ok(ChatInput::Empty) => {}
            Err(reason) => println!("! {}", reason),
        }
        Ok(true)
    }
}
