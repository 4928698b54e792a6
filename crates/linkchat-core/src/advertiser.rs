//! Link Advertiser (Responder role)
//!
//! Publishes the chat channel, advertises it under a room label and relays
//! chat lines: every completed inbound message is recorded, attributed to
//! its sender and echoed back out to the current subscriber.

use std::collections::HashMap;

use smallvec::SmallVec;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{InboundAssembly, LinkConfig};
use crate::errors::Result;
use crate::protocol::{
    sender_name_of, ChannelIdentity, Message, Reassembler, Reassembly, EOM_SENTINEL,
};
use crate::state::{AvailabilityFault, ChatStatus, ConnectStatus, ConnectionPhase, RadioState};
use crate::tracker::{ConnectionTracker, LinkSnapshot};
use crate::transfer::{ChunkSink, TransferEngine};
use crate::types::EndpointId;

// ----------------------------------------------------------------------------
// Events and Effects
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertiserEvent {
    RadioStateChanged(RadioState),
    /// The stack finished registering the channel
    ChannelPublished { error: Option<String> },
    AdvertisingStarted { error: Option<String> },
    Subscribed { endpoint: EndpointId },
    Unsubscribed { endpoint: EndpointId },
    WriteReceived { endpoint: EndpointId, bytes: Vec<u8> },
    WriteCapacityAvailable,
}

impl AdvertiserEvent {
    fn name(&self) -> &'static str {
        match self {
            AdvertiserEvent::RadioStateChanged(_) => "radio_state_changed",
            AdvertiserEvent::ChannelPublished { .. } => "channel_published",
            AdvertiserEvent::AdvertisingStarted { .. } => "advertising_started",
            AdvertiserEvent::Subscribed { .. } => "subscribed",
            AdvertiserEvent::Unsubscribed { .. } => "unsubscribed",
            AdvertiserEvent::WriteReceived { .. } => "write_received",
            AdvertiserEvent::WriteCapacityAvailable => "write_capacity_available",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertiserEffect {
    /// Replace any registered service with a fresh copy of the channel
    /// (write without response + notify)
    PublishChannel { channel: ChannelIdentity },
    StartAdvertising { label: String, service: Uuid },
    StopAdvertising,
}

pub type AdvertiserEffects = SmallVec<[AdvertiserEffect; 2]>;

// ----------------------------------------------------------------------------
// Advertiser
// ----------------------------------------------------------------------------

pub struct Advertiser<S: ChunkSink> {
    config: LinkConfig,
    channel: ChannelIdentity,
    tracker: ConnectionTracker,
    engine: TransferEngine,
    sink: S,
    radio: RadioState,
    /// Label to advertise under; kept across power cycles until `stop`
    room_label: Option<String>,
    advertising: bool,
    channel_published: bool,
    /// Oldest first; the last entry is the send target
    subscribers: Vec<EndpointId>,
    inbound: HashMap<EndpointId, Reassembler>,
    names: HashMap<EndpointId, String>,
}

impl<S: ChunkSink> Advertiser<S> {
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
            config,
            sink,
            radio: RadioState::Unknown,
            room_label: None,
            advertising: false,
            channel_published: false,
            subscribers: Vec::new(),
            inbound: HashMap::new(),
            names: HashMap::new(),
        })
    }

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

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn subscribers(&self) -> &[EndpointId] {
        &self.subscribers
    }

    /// Display name last seen in a chat line from `endpoint`
    pub fn display_name(&self, endpoint: &EndpointId) -> Option<&str> {
        self.names.get(endpoint).map(String::as_str)
    }

    // ------------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------------

    /// Advertise the chat channel under `room_label`
    ///
    /// Deferred until the radio is powered on.
    pub fn start_advertising(&mut self, room_label: impl Into<String>) -> AdvertiserEffects {
        let mut effects = AdvertiserEffects::new();
        self.room_label = Some(room_label.into());

        if !self.radio.is_powered_on() {
            debug!(radio = ?self.radio, "advertising deferred until power on");
            if self.radio.availability_fault().is_none() {
                self.tracker.set_fault(Some(AvailabilityFault::NotReady));
            }
            return effects;
        }

        if !self.channel_published {
            self.publish(&mut effects);
        }
        self.advertise(&mut effects, "start_advertising");
        effects
    }

    /// Transmit `text` to the current subscriber
    ///
    /// Silently does nothing when nobody is subscribed.
    pub fn send(&mut self, text: impl Into<String>) {
        if self.subscribers.is_empty() {
            debug!("no subscriber, dropping send");
            return;
        }
        if let Err(e) = self.engine.begin(text.into()) {
            warn!("rejecting outbound message: {}", e);
            self.tracker.set_chat_status(ChatStatus::FailToSend);
            return;
        }
        self.drain();
    }

    /// Withdraw the advertisement; subscribed peers stay connected
    pub fn stop(&mut self) -> AdvertiserEffects {
        let mut effects = AdvertiserEffects::new();
        self.room_label = None;
        if self.advertising {
            info!("stopping advertisement");
            effects.push(AdvertiserEffect::StopAdvertising);
            self.advertising = false;
        }
        if self.subscribers.is_empty() {
            self.tracker.transition(ConnectionPhase::Idle, "stop");
        }
        effects
    }

    // ------------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------------

    pub fn handle(&mut self, event: AdvertiserEvent) -> AdvertiserEffects {
        let mut effects = AdvertiserEffects::new();
        let name = event.name();

        match event {
            AdvertiserEvent::RadioStateChanged(radio) => self.on_radio(&mut effects, radio),

            AdvertiserEvent::ChannelPublished { error } => match error {
                None => debug!(service = %self.channel.service_id, "channel published"),
                Some(reason) => {
                    warn!(reason = %reason, "failed to publish channel");
                    self.channel_published = false;
                    self.tracker.set_connect_status(ConnectStatus::Fail);
                }
            },

            AdvertiserEvent::AdvertisingStarted { error } => match error {
                None => info!(label = ?self.room_label, "advertising"),
                Some(reason) => {
                    warn!(reason = %reason, "failed to start advertising");
                    self.advertising = false;
                    self.tracker.set_connect_status(ConnectStatus::Fail);
                    if self.subscribers.is_empty() {
                        self.tracker.transition(ConnectionPhase::Failed, name);
                    }
                }
            },

            AdvertiserEvent::Subscribed { endpoint } => {
                self.subscribers.retain(|known| *known != endpoint);
                self.subscribers.push(endpoint);
                info!(%endpoint, subscribers = self.subscribers.len(), "peer subscribed");
                self.tracker.set_remote(Some(endpoint));
                self.tracker.set_connect_status(ConnectStatus::Subscribed);
                self.tracker.transition(ConnectionPhase::Active, name);
            }

            AdvertiserEvent::Unsubscribed { endpoint } => self.on_unsubscribed(endpoint, name),

            AdvertiserEvent::WriteReceived { endpoint, bytes } => {
                self.on_write(endpoint, &bytes)
            }

            AdvertiserEvent::WriteCapacityAvailable => {
                if !self.subscribers.is_empty() {
                    self.drain();
                }
            }
        }

        effects
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn on_radio(&mut self, effects: &mut AdvertiserEffects, radio: RadioState) {
        let was_on = self.radio.is_powered_on();
        self.radio = radio;
        self.tracker.set_radio(radio);

        if radio.is_powered_on() && !was_on {
            self.publish(effects);
            if self.room_label.is_some() {
                self.advertise(effects, "radio_powered_on");
            }
        } else if !radio.is_powered_on() && was_on {
            if self.advertising {
                effects.push(AdvertiserEffect::StopAdvertising);
                self.advertising = false;
            }
            self.channel_published = false;
            self.abort_transfer();
            self.subscribers.clear();
            self.inbound.clear();
            self.names.clear();
            self.tracker.set_remote(None);
            self.tracker.transition(ConnectionPhase::Idle, "radio_lost");
        }
    }

    fn publish(&mut self, effects: &mut AdvertiserEffects) {
        self.channel_published = true;
        effects.push(AdvertiserEffect::PublishChannel {
            channel: self.channel,
        });
    }

    fn advertise(&mut self, effects: &mut AdvertiserEffects, event: &'static str) {
        let Some(label) = self.room_label.clone() else {
            return;
        };
        self.advertising = true;
        effects.push(AdvertiserEffect::StartAdvertising {
            label,
            service: self.channel.service_id,
        });
        if !self.tracker.phase().is_active() {
            self.tracker.transition(ConnectionPhase::Advertising, event);
        }
    }

    fn on_unsubscribed(&mut self, endpoint: EndpointId, event: &'static str) {
        let Some(position) = self.subscribers.iter().position(|known| *known == endpoint) else {
            return;
        };
        let was_target = position + 1 == self.subscribers.len();
        self.subscribers.remove(position);
        self.inbound.remove(&endpoint);
        let user_name = self.names.remove(&endpoint);
        info!(%endpoint, name = ?user_name, "peer unsubscribed");

        if was_target {
            self.abort_transfer();
        }
        self.tracker
            .set_connect_status(ConnectStatus::Disconnected { user_name });

        match self.subscribers.last() {
            Some(next) => self.tracker.set_remote(Some(*next)),
            None => {
                self.tracker.set_remote(None);
                self.tracker.transition(ConnectionPhase::Disconnected, event);
                if self.advertising {
                    self.tracker.transition(ConnectionPhase::Advertising, event);
                }
            }
        }
    }

    fn on_write(&mut self, endpoint: EndpointId, bytes: &[u8]) {
        let message = match self.config.inbound_assembly {
            InboundAssembly::Reassemble => {
                let reassembler = self.inbound.entry(endpoint).or_insert_with(|| {
                    Reassembler::new(self.config.framing, self.config.max_message_len)
                });
                match reassembler.push(bytes) {
                    Reassembly::Complete(message) => message,
                    Reassembly::Discarded => {
                        debug!(%endpoint, "inbound message discarded");
                        return;
                    }
                    Reassembly::Pending => return,
                }
            }
            InboundAssembly::PerWrite => {
                if bytes == EOM_SENTINEL {
                    return;
                }
                if bytes.len() > self.config.max_message_len {
                    debug!(%endpoint, bytes = bytes.len(), "inbound write too large");
                    return;
                }
                match std::str::from_utf8(bytes) {
                    Ok(text) => Message::new(text),
                    Err(e) => {
                        debug!(%endpoint, "ignoring write that is not UTF-8: {}", e);
                        return;
                    }
                }
            }
        };

        let sender = sender_name_of(message.text(), &self.config.name_separator).to_string();
        debug!(%endpoint, sender = %sender, "message received");
        self.names.insert(endpoint, sender);
        self.tracker.record_received(message.clone());
        self.send(message.into_text());
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
}
