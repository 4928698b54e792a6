//! Link Scanner (Initiator role)
//!
//! Discovers peers advertising the chat service, connects to one, resolves
//! the chat channel, subscribes to its notifications and then exchanges
//! chunked messages over it.
//!
//! The scanner performs no I/O. Radio callbacks arrive as [`ScannerEvent`]s
//! through [`Scanner::handle`], which returns the [`ScannerEffect`]s the
//! driver must carry out. Outbound chunks go straight to the owned
//! [`ChunkSink`].

use std::collections::HashMap;

use smallvec::SmallVec;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LinkConfig;
use crate::errors::Result;
use crate::protocol::{ChannelIdentity, Reassembler, Reassembly};
use crate::state::{AvailabilityFault, ChatStatus, ConnectStatus, ConnectionPhase, RadioState};
use crate::tracker::{ConnectionTracker, DiscoveredPeer, LinkSnapshot};
use crate::transfer::{ChunkSink, TransferEngine};
use crate::types::{EndpointId, Timestamp};

// ----------------------------------------------------------------------------
// Events and Effects
// ----------------------------------------------------------------------------

/// Result of looking up the chat channel on a connected peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelLookup {
    Found,
    NotFound,
    Error(String),
}

/// Radio callbacks consumed by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerEvent {
    RadioStateChanged(RadioState),
    PeerDiscovered {
        peer: EndpointId,
        advertised_name: Option<String>,
        device_name: Option<String>,
        rssi: Option<i16>,
    },
    Connected {
        peer: EndpointId,
    },
    ConnectFailed {
        peer: EndpointId,
        reason: String,
    },
    Disconnected {
        peer: EndpointId,
        reason: Option<String>,
    },
    ChannelDiscovered {
        peer: EndpointId,
        outcome: ChannelLookup,
    },
    SubscriptionChanged {
        peer: EndpointId,
        notifying: bool,
    },
    SubscribeFailed {
        peer: EndpointId,
        reason: String,
    },
    /// The peer's service table changed; the channel must be looked up again
    ServicesInvalidated {
        peer: EndpointId,
    },
    /// A notification arrived carrying an error instead of data
    ReceiveFailed {
        peer: EndpointId,
        reason: String,
    },
    DataReceived {
        peer: EndpointId,
        bytes: Vec<u8>,
    },
    /// The sink has room again after refusing a write
    WriteCapacityAvailable,
}

impl ScannerEvent {
    fn name(&self) -> &'static str {
        match self {
            ScannerEvent::RadioStateChanged(_) => "radio_state_changed",
            ScannerEvent::PeerDiscovered { .. } => "peer_discovered",
            ScannerEvent::Connected { .. } => "connected",
            ScannerEvent::ConnectFailed { .. } => "connect_failed",
            ScannerEvent::Disconnected { .. } => "disconnected",
            ScannerEvent::ChannelDiscovered { .. } => "channel_discovered",
            ScannerEvent::SubscriptionChanged { .. } => "subscription_changed",
            ScannerEvent::SubscribeFailed { .. } => "subscribe_failed",
            ScannerEvent::ServicesInvalidated { .. } => "services_invalidated",
            ScannerEvent::ReceiveFailed { .. } => "receive_failed",
            ScannerEvent::DataReceived { .. } => "data_received",
            ScannerEvent::WriteCapacityAvailable => "write_capacity_available",
        }
    }
}

/// Radio operations the driver performs on behalf of the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerEffect {
    StartScan { service: Uuid },
    StopScan,
    Connect { peer: EndpointId },
    DiscoverChannel {
        peer: EndpointId,
        channel: ChannelIdentity,
    },
    SetNotify { peer: EndpointId, enabled: bool },
    CancelConnection { peer: EndpointId },
}

pub type ScannerEffects = SmallVec<[ScannerEffect; 4]>;

// ----------------------------------------------------------------------------
// Scanner
// ----------------------------------------------------------------------------

pub struct Scanner<S: ChunkSink> {
    config: LinkConfig,
    channel: ChannelIdentity,
    tracker: ConnectionTracker,
    engine: TransferEngine,
    inbound: Reassembler,
    sink: S,
    radio: RadioState,
    /// The user asked for discovery and has not called `stop` since
    discovery_requested: bool,
    scanning: bool,
    /// Peers seen since the last cleanup, with the time of the latest sighting
    seen: HashMap<EndpointId, Timestamp>,
    remote: Option<EndpointId>,
    notifying: bool,
}

impl<S: ChunkSink> Scanner<S> {
    pub fn new(config: LinkConfig, sink: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            channel: ChannelIdentity::CHAT,
            tracker: ConnectionTracker::new(config.history_limit),
            engine: TransferEngine::new(
                config.framing,
                config.send_policy,
                config.max_message_len,
            ),
            inbound: Reassembler::new(config.framing, config.max_message_len),
            config,
            sink,
            radio: RadioState::Unknown,
            discovery_requested: false,
            scanning: false,
            seen: HashMap::new(),
            remote: None,
            notifying: false,
        })
    }

    /// Use a channel other than the built-in chat channel
    pub fn with_channel(mut self, channel: ChannelIdentity) -> Self {
        self.channel = channel;
        self
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        self.tracker.snapshot()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.tracker.phase()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn remote(&self) -> Option<EndpointId> {
        self.remote
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    // ------------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------------

    /// Begin scanning for the chat service
    ///
    /// Before the radio is powered on the request is remembered and an
    /// availability fault recorded; scanning starts on `PoweredOn`.
    pub fn start_discovery(&mut self) -> ScannerEffects {
        let mut effects = ScannerEffects::new();
        self.discovery_requested = true;

        if !self.radio.is_powered_on() {
            let fault = self
                .radio
                .availability_fault()
                .unwrap_or(AvailabilityFault::NotReady);
            warn!(radio = ?self.radio, "discovery requested while radio unavailable");
            self.tracker.set_fault(Some(fault));
            return effects;
        }

        if self.tracker.phase().is_linking() {
            debug!("discovery requested while linked, resumes after the link ends");
            return effects;
        }

        self.begin_scan(&mut effects, "start_discovery");
        effects
    }

    /// Connect to a previously discovered peer
    pub fn connect(&mut self, peer: EndpointId) -> ScannerEffects {
        let mut effects = ScannerEffects::new();

        if !self.seen.contains_key(&peer) {
            warn!(%peer, "connect requested for a peer that was never discovered");
            return effects;
        }
        if self.tracker.phase().is_linking() {
            debug!(%peer, phase = %self.tracker.phase(), "already linked, ignoring connect");
            return effects;
        }
        if !self.radio.is_powered_on() {
            self.tracker.set_fault(Some(AvailabilityFault::NotReady));
            return effects;
        }

        info!(%peer, "connecting");
        self.remote = Some(peer);
        self.tracker.set_remote(Some(peer));
        self.tracker.set_connect_status(ConnectStatus::None);
        self.tracker.transition(ConnectionPhase::Connecting, "connect");
        effects.push(ScannerEffect::Connect { peer });
        effects
    }

    /// Transmit `text` to the connected peer
    ///
    /// Silently does nothing unless the channel is active.
    pub fn send(&mut self, text: impl Into<String>) {
        if !self.tracker.phase().is_active() {
            debug!(phase = %self.tracker.phase(), "no writable channel, dropping send");
            return;
        }
        if let Err(e) = self.engine.begin(text.into()) {
            warn!("rejecting outbound message: {}", e);
            self.tracker.set_chat_status(ChatStatus::FailToSend);
            return;
        }
        self.drain();
    }

    /// Leave the link and stop discovery
    ///
    /// Safe in any phase and when repeated.
    pub fn stop(&mut self) -> ScannerEffects {
        let mut effects = ScannerEffects::new();

        if let Some(peer) = self.remote {
            if self.notifying {
                effects.push(ScannerEffect::SetNotify {
                    peer,
                    enabled: false,
                });
            }
            effects.push(ScannerEffect::CancelConnection { peer });
        }
        self.release_link();

        if self.scanning {
            effects.push(ScannerEffect::StopScan);
            self.scanning = false;
        }
        self.discovery_requested = false;
        self.tracker.transition(ConnectionPhase::Idle, "stop");
        effects
    }

    // ------------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------------

    pub fn handle(&mut self, event: ScannerEvent) -> ScannerEffects {
        let mut effects = ScannerEffects::new();
        let name = event.name();

        match event {
            ScannerEvent::RadioStateChanged(radio) => self.on_radio(&mut effects, radio),

            ScannerEvent::PeerDiscovered {
                peer,
                advertised_name,
                device_name,
                rssi,
            } => {
                self.seen.insert(peer, Timestamp::now());
                let name = advertised_name
                    .or(device_name)
                    .unwrap_or_else(|| self.config.fallback_peer_name.clone());
                if self.tracker.add_peer(DiscoveredPeer {
                    id: peer,
                    name: name.clone(),
                    rssi,
                }) {
                    info!(%peer, name = %name, "discovered peer");
                }
            }

            ScannerEvent::Connected { peer } => {
                if self.remote != Some(peer) {
                    debug!(%peer, "connection no longer wanted, cancelling");
                    effects.push(ScannerEffect::CancelConnection { peer });
                    return effects;
                }
                if self.tracker.phase() != ConnectionPhase::Connecting {
                    return effects;
                }
                if self.scanning {
                    effects.push(ScannerEffect::StopScan);
                    self.scanning = false;
                }
                self.tracker.set_connect_status(ConnectStatus::Success);
                self.tracker
                    .transition(ConnectionPhase::DiscoveringChannel, name);
                effects.push(ScannerEffect::DiscoverChannel {
                    peer,
                    channel: self.channel,
                });
            }

            ScannerEvent::ConnectFailed { peer, reason } => {
                if self.remote == Some(peer) {
                    warn!(%peer, reason = %reason, "connection failed");
                    self.fail(&mut effects, false, name);
                }
            }

            ScannerEvent::Disconnected { peer, reason } => {
                if self.remote != Some(peer) {
                    return effects;
                }
                info!(%peer, reason = ?reason, "peer disconnected");
                if self.tracker.phase().is_active() {
                    self.drop_link(&mut effects, false, name);
                } else {
                    self.fail(&mut effects, false, name);
                }
            }

            ScannerEvent::ChannelDiscovered { peer, outcome } => {
                if self.remote != Some(peer)
                    || self.tracker.phase() != ConnectionPhase::DiscoveringChannel
                {
                    return effects;
                }
                match outcome {
                    ChannelLookup::Found => {
                        self.tracker.transition(ConnectionPhase::Subscribing, name);
                        effects.push(ScannerEffect::SetNotify {
                            peer,
                            enabled: true,
                        });
                    }
                    ChannelLookup::NotFound => {
                        warn!(%peer, "chat channel not found on peer");
                        self.fail(&mut effects, true, name);
                    }
                    ChannelLookup::Error(reason) => {
                        warn!(%peer, reason = %reason, "channel discovery failed");
                        self.fail(&mut effects, true, name);
                    }
                }
            }

            ScannerEvent::SubscriptionChanged { peer, notifying } => {
                if self.remote != Some(peer) {
                    return effects;
                }
                match (notifying, self.tracker.phase()) {
                    (true, ConnectionPhase::Subscribing) => {
                        self.notifying = true;
                        info!(%peer, "channel active");
                        self.tracker.set_connect_status(ConnectStatus::Subscribed);
                        self.tracker.transition(ConnectionPhase::Active, name);
                    }
                    (false, ConnectionPhase::Active) => {
                        warn!(%peer, "notifications stopped");
                        self.notifying = false;
                        self.drop_link(&mut effects, true, name);
                    }
                    (false, ConnectionPhase::Subscribing) => {
                        self.fail(&mut effects, true, name);
                    }
                    _ => {}
                }
            }

            ScannerEvent::SubscribeFailed { peer, reason } => {
                if self.remote == Some(peer)
                    && self.tracker.phase() == ConnectionPhase::Subscribing
                {
                    warn!(%peer, reason = %reason, "subscribe failed");
                    self.tracker.set_chat_status(ChatStatus::FailToSend);
                    self.fail(&mut effects, true, name);
                }
            }

            ScannerEvent::ServicesInvalidated { peer } => {
                let phase = self.tracker.phase();
                if self.remote != Some(peer)
                    || !matches!(
                        phase,
                        ConnectionPhase::DiscoveringChannel
                            | ConnectionPhase::Subscribing
                            | ConnectionPhase::Active
                    )
                {
                    return effects;
                }
                info!(%peer, "services changed, rediscovering channel");
                self.abort_transfer();
                self.inbound.clear();
                self.notifying = false;
                self.tracker
                    .transition(ConnectionPhase::DiscoveringChannel, name);
                effects.push(ScannerEffect::DiscoverChannel {
                    peer,
                    channel: self.channel,
                });
            }

            ScannerEvent::ReceiveFailed { peer, reason } => {
                if self.remote != Some(peer) || !self.tracker.phase().is_linking() {
                    return effects;
                }
                warn!(%peer, reason = %reason, "notification error");
                self.tracker.set_chat_status(ChatStatus::FailToSend);
                if self.tracker.phase().is_active() {
                    self.drop_link(&mut effects, true, name);
                } else {
                    self.fail(&mut effects, true, name);
                }
            }

            ScannerEvent::DataReceived { peer, bytes } => {
                let phase = self.tracker.phase();
                if self.remote != Some(peer)
                    || !matches!(phase, ConnectionPhase::Subscribing | ConnectionPhase::Active)
                {
                    debug!(%peer, bytes = bytes.len(), "ignoring data outside a session");
                    return effects;
                }
                match self.inbound.push(&bytes) {
                    Reassembly::Complete(message) => {
                        debug!(%peer, bytes = message.text().len(), "message received");
                        self.tracker.record_received(message);
                    }
                    Reassembly::Discarded => debug!(%peer, "inbound message discarded"),
                    Reassembly::Pending => {}
                }
            }

            ScannerEvent::WriteCapacityAvailable => {
                if self.tracker.phase().is_active() {
                    self.drain();
                }
            }
        }

        effects
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn on_radio(&mut self, effects: &mut ScannerEffects, radio: RadioState) {
        let was_on = self.radio.is_powered_on();
        self.radio = radio;
        self.tracker.set_radio(radio);

        if radio.is_powered_on() {
            if !was_on && self.discovery_requested && !self.tracker.phase().is_linking() {
                self.begin_scan(effects, "radio_powered_on");
            }
            return;
        }

        if !was_on {
            return;
        }
        // The stack has already torn down scans and links
        self.scanning = false;
        if self.tracker.phase().is_linking() {
            let was_active = self.tracker.phase().is_active();
            self.release_link();
            if was_active {
                self.tracker
                    .set_connect_status(ConnectStatus::Disconnected { user_name: None });
            }
            self.tracker
                .transition(ConnectionPhase::Disconnected, "radio_lost");
        } else if self.tracker.phase() == ConnectionPhase::Scanning {
            self.tracker.transition(ConnectionPhase::Idle, "radio_lost");
        }
    }

    fn begin_scan(&mut self, effects: &mut ScannerEffects, event: &'static str) {
        if !self.radio.is_powered_on() {
            return;
        }
        if !self.scanning {
            self.scanning = true;
            effects.push(ScannerEffect::StartScan {
                service: self.channel.service_id,
            });
        }
        // A failed attempt stays visible while discovery carries on
        if self.tracker.phase() != ConnectionPhase::Failed {
            self.tracker.transition(ConnectionPhase::Scanning, event);
        }
    }

    fn drain(&mut self) {
        let report = self.engine.drain(&mut self.sink);
        for message in report.completed {
            self.tracker.record_sent(message);
        }
    }

    fn abort_transfer(&mut self) {
        if let Some(aborted) = self.engine.abort() {
            warn!(
                text = %aborted.text,
                sent = aborted.bytes_sent,
                queued = aborted.queued_dropped,
                "aborted outbound transfer"
            );
            self.tracker.set_chat_status(ChatStatus::FailToSend);
        }
        self.sink.discard_pending();
    }

    /// Unsubscribe then disconnect, when the link is still up
    fn close_remote(&mut self, effects: &mut ScannerEffects, link_up: bool) {
        let Some(peer) = self.remote.filter(|_| link_up) else {
            return;
        };
        if self.notifying {
            effects.push(ScannerEffect::SetNotify {
                peer,
                enabled: false,
            });
        }
        effects.push(ScannerEffect::CancelConnection { peer });
    }

    fn release_link(&mut self) {
        self.abort_transfer();
        self.inbound.clear();
        self.remote = None;
        self.notifying = false;
        self.tracker.set_remote(None);
    }

    /// Connection attempt failed before reaching `Active`
    fn fail(&mut self, effects: &mut ScannerEffects, link_up: bool, event: &'static str) {
        self.close_remote(effects, link_up);
        self.release_link();
        self.seen.clear();
        self.tracker.clear_peers();
        self.tracker.set_connect_status(ConnectStatus::Fail);
        self.tracker.transition(ConnectionPhase::Failed, event);
        if self.discovery_requested {
            self.begin_scan(effects, event);
        }
    }

    /// An active link went away
    fn drop_link(&mut self, effects: &mut ScannerEffects, link_up: bool, event: &'static str) {
        self.close_remote(effects, link_up);
        self.release_link();
        self.tracker
            .set_connect_status(ConnectStatus::Disconnected { user_name: None });
        self.tracker.transition(ConnectionPhase::Disconnected, event);
        if self.config.auto_rescan {
            self.discovery_requested = true;
            self.begin_scan(effects, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EOM_SENTINEL;
    use crate::write_queue::WriteQueue;

    const PEER: EndpointId = EndpointId::from_u128(7);

    fn scanner() -> Scanner<WriteQueue> {
        Scanner::new(LinkConfig::default(), WriteQueue::new(64, 20)).unwrap()
    }

    fn discovered(peer: EndpointId, name: Option<&str>) -> ScannerEvent {
        ScannerEvent::PeerDiscovered {
            peer,
            advertised_name: name.map(str::to_string),
            device_name: None,
            rssi: Some(-60),
        }
    }

    fn active_scanner() -> Scanner<WriteQueue> {
        let mut scanner = scanner();
        scanner.handle(ScannerEvent::RadioStateChanged(RadioState::PoweredOn));
        scanner.start_discovery();
        scanner.handle(discovered(PEER, Some("Lobby")));
        scanner.connect(PEER);
        scanner.handle(ScannerEvent::Connected { peer: PEER });
        scanner.handle(ScannerEvent::ChannelDiscovered {
            peer: PEER,
            outcome: ChannelLookup::Found,
        });
        scanner.handle(ScannerEvent::SubscriptionChanged {
            peer: PEER,
            notifying: true,
        });
        assert_eq!(scanner.phase(), ConnectionPhase::Active);
        scanner
    }

    #[test]
    fn discovery_waits_for_power_on() {
        let mut scanner = scanner();
        assert!(scanner.start_discovery().is_empty());
        assert_eq!(scanner.snapshot().fault, Some(AvailabilityFault::NotReady));
        assert_eq!(scanner.phase(), ConnectionPhase::Idle);

        let effects = scanner.handle(ScannerEvent::RadioStateChanged(RadioState::PoweredOn));
        assert_eq!(
            effects.as_slice(),
            &[ScannerEffect::StartScan {
                service: ChannelIdentity::CHAT.service_id
            }]
        );
        assert_eq!(scanner.phase(), ConnectionPhase::Scanning);
        assert_eq!(scanner.snapshot().fault, None);
    }

    #[test]
    fn unauthorized_radio_is_reported() {
        let mut scanner = scanner();
        scanner.handle(ScannerEvent::RadioStateChanged(RadioState::Unauthorized));
        scanner.start_discovery();
        assert_eq!(
            scanner.snapshot().fault,
            Some(AvailabilityFault::Unauthorized)
        );
    }

    #[test]
    fn peer_names_fall_back() {
        let mut scanner = scanner();
        scanner.handle(ScannerEvent::RadioStateChanged(RadioState::PoweredOn));
        scanner.start_discovery();
        scanner.handle(ScannerEvent::PeerDiscovered {
            peer: EndpointId::from_u128(1),
            advertised_name: None,
            device_name: Some("Pixel".to_string()),
            rssi: None,
        });
        scanner.handle(discovered(EndpointId::from_u128(2), None));

        let peers = scanner.snapshot().peers;
        assert_eq!(peers[0].name, "Pixel");
        assert_eq!(peers[1].name, "Unknown room");
    }

    #[test]
    fn connect_requires_discovered_peer() {
        let mut scanner = scanner();
        scanner.handle(ScannerEvent::RadioStateChanged(RadioState::PoweredOn));
        scanner.start_discovery();
        assert!(scanner.connect(PEER).is_empty());
        assert_eq!(scanner.phase(), ConnectionPhase::Scanning);
    }

    #[test]
    fn walks_to_active_and_stops_scanning_on_connect() {
        let mut scanner = scanner();
        scanner.handle(ScannerEvent::RadioStateChanged(RadioState::PoweredOn));
        scanner.start_discovery();
        scanner.handle(discovered(PEER, Some("Lobby")));

        assert_eq!(
            scanner.connect(PEER).as_slice(),
            &[ScannerEffect::Connect { peer: PEER }]
        );
        let effects = scanner.handle(ScannerEvent::Connected { peer: PEER });
        assert_eq!(effects[0], ScannerEffect::StopScan);
        assert!(matches!(effects[1], ScannerEffect::DiscoverChannel { .. }));
        assert_eq!(scanner.snapshot().connect_status, ConnectStatus::Success);

        let effects = scanner.handle(ScannerEvent::ChannelDiscovered {
            peer: PEER,
            outcome: ChannelLookup::Found,
        });
        assert_eq!(
            effects.as_slice(),
            &[ScannerEffect::SetNotify {
                peer: PEER,
                enabled: true
            }]
        );
        scanner.handle(ScannerEvent::SubscriptionChanged {
            peer: PEER,
            notifying: true,
        });
        assert_eq!(scanner.phase(), ConnectionPhase::Active);
        assert_eq!(scanner.snapshot().connect_status, ConnectStatus::Subscribed);
    }

    #[test]
    fn missing_channel_fails_with_cleanup_and_keeps_scanning() {
        let mut scanner = scanner();
        scanner.handle(ScannerEvent::RadioStateChanged(RadioState::PoweredOn));
        scanner.start_discovery();
        scanner.handle(discovered(PEER, Some("Lobby")));
        scanner.connect(PEER);
        scanner.handle(ScannerEvent::Connected { peer: PEER });

        let effects = scanner.handle(ScannerEvent::ChannelDiscovered {
            peer: PEER,
            outcome: ChannelLookup::NotFound,
        });
        assert!(effects.contains(&ScannerEffect::CancelConnection { peer: PEER }));
        assert!(effects.iter().any(|e| matches!(e, ScannerEffect::StartScan { .. })));

        let snapshot = scanner.snapshot();
        assert_eq!(snapshot.phase, ConnectionPhase::Failed);
        assert_eq!(snapshot.connect_status, ConnectStatus::Fail);
        assert!(snapshot.peers.is_empty());
        assert!(scanner.is_scanning());
    }

    #[test]
    fn connect_is_allowed_again_after_failure() {
        let mut scanner = scanner();
        scanner.handle(ScannerEvent::RadioStateChanged(RadioState::PoweredOn));
        scanner.start_discovery();
        scanner.handle(discovered(PEER, Some("Lobby")));
        scanner.connect(PEER);
        scanner.handle(ScannerEvent::ConnectFailed {
            peer: PEER,
            reason: "timeout".to_string(),
        });
        assert_eq!(scanner.phase(), ConnectionPhase::Failed);

        scanner.handle(discovered(PEER, Some("Lobby")));
        assert_eq!(
            scanner.connect(PEER).as_slice(),
            &[ScannerEffect::Connect { peer: PEER }]
        );
        assert_eq!(scanner.phase(), ConnectionPhase::Connecting);
    }

    #[test]
    fn drop_after_active_rescans() {
        let mut scanner = active_scanner();
        let effects = scanner.handle(ScannerEvent::Disconnected {
            peer: PEER,
            reason: None,
        });
        assert!(effects.iter().any(|e| matches!(e, ScannerEffect::StartScan { .. })));
        let snapshot = scanner.snapshot();
        assert_eq!(snapshot.phase, ConnectionPhase::Scanning);
        assert_eq!(
            snapshot.connect_status,
            ConnectStatus::Disconnected { user_name: None }
        );
        assert_eq!(snapshot.remote, None);
    }

    #[test]
    fn drop_without_auto_rescan_stays_disconnected() {
        let config = LinkConfig::default().with_auto_rescan(false);
        let mut scanner = Scanner::new(config, WriteQueue::new(8, 20)).unwrap();
        scanner.handle(ScannerEvent::RadioStateChanged(RadioState::PoweredOn));
        scanner.start_discovery();
        scanner.handle(discovered(PEER, None));
        scanner.connect(PEER);
        scanner.handle(ScannerEvent::Connected { peer: PEER });
        scanner.handle(ScannerEvent::ChannelDiscovered {
            peer: PEER,
            outcome: ChannelLookup::Found,
        });
        scanner.handle(ScannerEvent::SubscriptionChanged {
            peer: PEER,
            notifying: true,
        });

        let effects = scanner.handle(ScannerEvent::Disconnected {
            peer: PEER,
            reason: None,
        });
        assert!(effects.is_empty());
        assert_eq!(scanner.phase(), ConnectionPhase::Disconnected);
    }

    #[test]
    fn send_is_noop_until_active() {
        let mut scanner = scanner();
        scanner.send("hello");
        assert!(scanner.sink().is_empty());
    }

    #[test]
    fn send_writes_chunks_and_records_history() {
        let mut scanner = active_scanner();
        scanner.send("hello");
        assert_eq!(scanner.sink_mut().pop(), Some(b"hello".to_vec()));
        assert_eq!(scanner.sink_mut().pop(), Some(EOM_SENTINEL.to_vec()));
        let snapshot = scanner.snapshot();
        assert_eq!(snapshot.last_sent.unwrap().text(), "hello");
        assert_eq!(snapshot.chat_status, ChatStatus::SuccessToSend);
    }

    #[test]
    fn oversized_send_reports_failure() {
        let config = LinkConfig::default().with_max_message_len(4);
        let mut scanner = Scanner::new(config, WriteQueue::new(8, 20)).unwrap();
        scanner.handle(ScannerEvent::RadioStateChanged(RadioState::PoweredOn));
        scanner.start_discovery();
        scanner.handle(discovered(PEER, None));
        scanner.connect(PEER);
        scanner.handle(ScannerEvent::Connected { peer: PEER });
        scanner.handle(ScannerEvent::ChannelDiscovered {
            peer: PEER,
            outcome: ChannelLookup::Found,
        });
        scanner.handle(ScannerEvent::SubscriptionChanged {
            peer: PEER,
            notifying: true,
        });

        scanner.send("too long");
        assert_eq!(scanner.snapshot().chat_status, ChatStatus::FailToSend);
        assert!(scanner.sink().is_empty());
    }

    #[test]
    fn reassembles_notifications() {
        let mut scanner = active_scanner();
        for chunk in [b"hel".as_slice(), b"lo".as_slice(), EOM_SENTINEL] {
            scanner.handle(ScannerEvent::DataReceived {
                peer: PEER,
                bytes: chunk.to_vec(),
            });
        }
        assert_eq!(scanner.snapshot().last_received.unwrap().text(), "hello");
    }

    #[test]
    fn stop_unsubscribes_before_disconnecting_and_is_idempotent() {
        let mut scanner = active_scanner();
        scanner.handle(ScannerEvent::DataReceived {
            peer: PEER,
            bytes: b"partial".to_vec(),
        });

        let effects = scanner.stop();
        assert_eq!(
            effects.as_slice(),
            &[
                ScannerEffect::SetNotify {
                    peer: PEER,
                    enabled: false
                },
                ScannerEffect::CancelConnection { peer: PEER },
            ]
        );
        assert_eq!(scanner.phase(), ConnectionPhase::Idle);
        assert!(scanner.stop().is_empty());
        assert_eq!(scanner.phase(), ConnectionPhase::Idle);

        // A late disconnect for the released peer changes nothing
        scanner.handle(ScannerEvent::Disconnected {
            peer: PEER,
            reason: None,
        });
        assert_eq!(scanner.phase(), ConnectionPhase::Idle);
    }

    #[test]
    fn services_invalidated_rediscovers_channel() {
        let mut scanner = active_scanner();
        let effects = scanner.handle(ScannerEvent::ServicesInvalidated { peer: PEER });
        assert!(matches!(
            effects.as_slice(),
            [ScannerEffect::DiscoverChannel { peer, .. }] if *peer == PEER
        ));
        assert_eq!(scanner.phase(), ConnectionPhase::DiscoveringChannel);
    }

    #[test]
    fn notifications_turning_off_tears_down() {
        let mut scanner = active_scanner();
        let effects = scanner.handle(ScannerEvent::SubscriptionChanged {
            peer: PEER,
            notifying: false,
        });
        assert!(effects.contains(&ScannerEffect::CancelConnection { peer: PEER }));
        assert!(!effects.iter().any(|e| matches!(e, ScannerEffect::SetNotify { .. })));
        assert_eq!(scanner.phase(), ConnectionPhase::Scanning);
    }

    #[test]
    fn power_loss_drops_link() {
        let mut scanner = active_scanner();
        scanner.handle(ScannerEvent::RadioStateChanged(RadioState::PoweredOff));
        assert_eq!(scanner.phase(), ConnectionPhase::Disconnected);
        assert!(!scanner.is_scanning());

        let effects = scanner.handle(ScannerEvent::RadioStateChanged(RadioState::PoweredOn));
        assert!(effects.iter().any(|e| matches!(e, ScannerEffect::StartScan { .. })));
        assert_eq!(scanner.phase(), ConnectionPhase::Scanning);
    }
}
