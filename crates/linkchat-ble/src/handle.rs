//! Command handle shared by both drivers
//!
//! A driver owns its role state machine on a single task; callers talk to it
//! through a cloneable [`LinkHandle`] and observe it through the tracker's
//! watch channel.

use async_trait::async_trait;
use linkchat_core::{EndpointId, LinkSnapshot};
use tokio::sync::{mpsc, watch};

use crate::error::{BleLinkError, Result};

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// Operations forwarded to the driver task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    StartDiscovery,
    Connect(EndpointId),
    StartAdvertising(String),
    Send(String),
    Stop,
    /// Stop, release the radio and end `run`
    Shutdown,
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LinkHandle {
    commands: mpsc::Sender<LinkCommand>,
    state: watch::Receiver<LinkSnapshot>,
}

impl LinkHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<LinkCommand>,
        state: watch::Receiver<LinkSnapshot>,
    ) -> Self {
        Self { commands, state }
    }

    async fn submit(&self, command: LinkCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BleLinkError::LinkClosed)
    }

    /// Initiator only
    pub async fn start_discovery(&self) -> Result<()> {
        self.submit(LinkCommand::StartDiscovery).await
    }

    /// Initiator only
    pub async fn connect(&self, peer: EndpointId) -> Result<()> {
        self.submit(LinkCommand::Connect(peer)).await
    }

    /// Responder only
    pub async fn start_advertising(&self, room_label: impl Into<String>) -> Result<()> {
        self.submit(LinkCommand::StartAdvertising(room_label.into()))
            .await
    }

    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        self.submit(LinkCommand::Send(text.into())).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.submit(LinkCommand::Stop).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.submit(LinkCommand::Shutdown).await
    }

    /// Current observable state
    pub fn snapshot(&self) -> LinkSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver woken on every state change
    pub fn subscribe(&self) -> watch::Receiver<LinkSnapshot> {
        self.state.clone()
    }
}

// ----------------------------------------------------------------------------
// Driver Trait
// ----------------------------------------------------------------------------

/// A radio driver that runs one role until shut down
#[async_trait]
pub trait LinkDriver: Send {
    /// Process radio events and commands until `Shutdown` or every handle
    /// is dropped
    async fn run(self) -> Result<()>
    where
        Self: Sized;
}
