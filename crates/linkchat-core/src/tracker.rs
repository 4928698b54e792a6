//! Connection State Tracker
//!
//! Publishes the observable state of one role instance (phase, statuses,
//! discovered peers, chat history) through a `tokio::sync::watch` channel so
//! any number of observers can follow it without polling the role itself.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::protocol::Message;
use crate::state::{AvailabilityFault, ChatStatus, ConnectStatus, ConnectionPhase, RadioState};
use crate::types::EndpointId;

// ----------------------------------------------------------------------------
// Observable Values
// ----------------------------------------------------------------------------

/// A peer seen advertising the chat service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPeer {
    pub id: EndpointId,
    pub name: String,
    pub rssi: Option<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

/// One line of the local chat history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Position in the role's history, increasing by one per entry and never
    /// reused after older entries are dropped
    pub seq: u64,
    pub direction: Direction,
    pub message: Message,
}

/// Everything the presentation layer can observe about a role instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub phase: ConnectionPhase,
    pub connect_status: ConnectStatus,
    pub chat_status: ChatStatus,
    pub radio: RadioState,
    pub fault: Option<AvailabilityFault>,
    /// Endpoint currently targeted by `send`
    pub remote: Option<EndpointId>,
    pub last_received: Option<Message>,
    pub last_sent: Option<Message>,
    pub peers: Vec<DiscoveredPeer>,
    /// Oldest first, bounded by the configured history limit
    pub history: Vec<ChatEntry>,
}

// ----------------------------------------------------------------------------
// Tracker
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct ConnectionTracker {
    state: watch::Sender<LinkSnapshot>,
    history_limit: usize,
}

impl ConnectionTracker {
    pub fn new(history_limit: usize) -> Self {
        let (state, _) = watch::channel(LinkSnapshot::default());
        Self {
            state,
            history_limit: history_limit.max(1),
        }
    }

    /// Receiver notified on every change
    pub fn subscribe(&self) -> watch::Receiver<LinkSnapshot> {
        self.state.subscribe()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> LinkSnapshot {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.borrow().phase
    }

    pub fn radio(&self) -> RadioState {
        self.state.borrow().radio
    }

    pub fn remote(&self) -> Option<EndpointId> {
        self.state.borrow().remote
    }

    /// Move to `to`, logging the event that caused it
    pub fn transition(&self, to: ConnectionPhase, event: &'static str) {
        self.state.send_if_modified(|snapshot| {
            if snapshot.phase == to {
                return false;
            }
            debug!(from = %snapshot.phase, to = %to, event, "phase transition");
            snapshot.phase = to;
            true
        });
    }

    pub fn set_connect_status(&self, status: ConnectStatus) {
        self.state.send_modify(|snapshot| snapshot.connect_status = status);
    }

    pub fn set_chat_status(&self, status: ChatStatus) {
        self.state.send_modify(|snapshot| snapshot.chat_status = status);
    }

    /// Record the radio state and derive the availability fault from it
    pub fn set_radio(&self, radio: RadioState) {
        self.state.send_modify(|snapshot| {
            snapshot.radio = radio;
            match radio.availability_fault() {
                Some(fault) => {
                    warn!(?fault, "radio unavailable");
                    snapshot.fault = Some(fault);
                }
                None if radio.is_powered_on() => snapshot.fault = None,
                None => {}
            }
        });
    }

    pub fn set_fault(&self, fault: Option<AvailabilityFault>) {
        self.state.send_modify(|snapshot| snapshot.fault = fault);
    }

    pub fn set_remote(&self, remote: Option<EndpointId>) {
        self.state.send_modify(|snapshot| snapshot.remote = remote);
    }

    /// Add a peer to the discovered list; first-seen wins
    ///
    /// Returns false when the peer was already listed.
    pub fn add_peer(&self, peer: DiscoveredPeer) -> bool {
        self.state.send_if_modified(|snapshot| {
            if snapshot.peers.iter().any(|known| known.id == peer.id) {
                return false;
            }
            snapshot.peers.push(peer);
            true
        })
    }

    pub fn clear_peers(&self) {
        self.state.send_if_modified(|snapshot| {
            let had_peers = !snapshot.peers.is_empty();
            snapshot.peers.clear();
            had_peers
        });
    }

    /// Publish a message whose final write was accepted
    pub fn record_sent(&self, message: Message) {
        self.record(Direction::Sent, message);
    }

    /// Publish a completed inbound message
    pub fn record_received(&self, message: Message) {
        self.record(Direction::Received, message);
    }

    fn record(&self, direction: Direction, message: Message) {
        let limit = self.history_limit;
        self.state.send_modify(|snapshot| {
            match direction {
                Direction::Sent => snapshot.last_sent = Some(message.clone()),
                Direction::Received => snapshot.last_received = Some(message.clone()),
            }
            snapshot.chat_status = ChatStatus::SuccessToSend;
            let seq = snapshot.history.last().map_or(0, |last| last.seq + 1);
            snapshot.history.push(ChatEntry {
                seq,
                direction,
                message,
            });
            if snapshot.history.len() > limit {
                let excess = snapshot.history.len() - limit;
                snapshot.history.drain(..excess);
            }
        });
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u128, name: &str) -> DiscoveredPeer {
        DiscoveredPeer {
            id: EndpointId::from_u128(n),
            name: name.to_string(),
            rssi: None,
        }
    }

    #[test]
    fn peers_deduplicate_first_seen_wins() {
        let tracker = ConnectionTracker::default();
        assert!(tracker.add_peer(peer(1, "Kitchen")));
        assert!(!tracker.add_peer(peer(1, "Renamed")));
        assert!(tracker.add_peer(peer(2, "Garage")));

        let peers = tracker.snapshot().peers;
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].name, "Kitchen");
    }

    #[test]
    fn history_is_bounded() {
        let tracker = ConnectionTracker::new(2);
        tracker.record_sent(Message::new("a"));
        tracker.record_received(Message::new("b"));
        tracker.record_sent(Message::new("c"));

        let snapshot = tracker.snapshot();
        let texts: Vec<&str> = snapshot.history.iter().map(|e| e.message.text()).collect();
        assert_eq!(texts, vec!["b", "c"]);
        let seqs: Vec<u64> = snapshot.history.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(snapshot.last_received.unwrap().text(), "b");
        assert_eq!(snapshot.last_sent.unwrap().text(), "c");
        assert_eq!(snapshot.chat_status, ChatStatus::SuccessToSend);
    }

    #[test]
    fn radio_fault_cleared_on_power_on() {
        let tracker = ConnectionTracker::default();
        tracker.set_radio(RadioState::Unauthorized);
        assert_eq!(tracker.snapshot().fault, Some(AvailabilityFault::Unauthorized));
        tracker.set_radio(RadioState::Resetting);
        assert_eq!(tracker.snapshot().fault, Some(AvailabilityFault::Unauthorized));
        tracker.set_radio(RadioState::PoweredOn);
        assert_eq!(tracker.snapshot().fault, None);
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let tracker = ConnectionTracker::default();
        let mut rx = tracker.subscribe();
        tracker.transition(ConnectionPhase::Scanning, "start_discovery");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().phase, ConnectionPhase::Scanning);

        tracker.transition(ConnectionPhase::Scanning, "start_discovery");
        assert!(!rx.has_changed().unwrap());
    }
}
