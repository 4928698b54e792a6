//! Responder driver over BlueZ (peripheral mode, Linux only)
//!
//! Serves the chat characteristic as a GATT application and advertises it.
//! Writes and notification sessions arrive from BlueZ callbacks over an
//! internal channel and drive an [`Advertiser`]; outbound chunks are sent
//! as notifications to the current subscriber.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicWrite, CharacteristicWriteMethod,
    CharacteristicWriteRequest, ReqError, Service,
};
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address};
use futures::stream::StreamExt;
use linkchat_core::{
    Advertiser, AdvertiserEffect, AdvertiserEffects, AdvertiserEvent, ChannelIdentity, EndpointId,
    LinkConfig, RadioState, WriteQueue,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{payload_for_att_mtu, BleLinkConfig};
use crate::error::{BleLinkError, Result};
use crate::handle::{LinkCommand, LinkDriver, LinkHandle};

/// How often notification sessions are checked for remote teardown
const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(1);

// ----------------------------------------------------------------------------
// GATT callbacks
// ----------------------------------------------------------------------------

/// Raised from inside BlueZ callbacks
enum GattEvent {
    Subscribed(CharacteristicNotifier),
    Write {
        address: Address,
        mtu: u16,
        bytes: Vec<u8>,
    },
}

/// One remote notification session
struct NotifySession {
    endpoint: EndpointId,
    notifier: CharacteristicNotifier,
    /// Bound on the first write seen after subscribing
    address: Option<Address>,
}

// ----------------------------------------------------------------------------
// Peripheral Link
// ----------------------------------------------------------------------------

/// Responder role bound to a BlueZ adapter
pub struct PeripheralLink {
    session: PeripheralSession,
    commands: mpsc::Receiver<LinkCommand>,
    gatt_rx: mpsc::Receiver<GattEvent>,
}

struct PeripheralSession {
    adapter: Adapter,
    advertiser: Advertiser<WriteQueue>,
    gatt_tx: mpsc::Sender<GattEvent>,
    app_handle: Option<ApplicationHandle>,
    adv_handle: Option<AdvertisementHandle>,
    sessions: Vec<NotifySession>,
    addresses: HashMap<Address, EndpointId>,
    /// Events raised while performing effects or flushing
    deferred: VecDeque<AdvertiserEvent>,
}

impl PeripheralLink {
    /// Open a BlueZ session on the configured adapter and power it on
    pub async fn new(config: BleLinkConfig, link_config: LinkConfig) -> Result<(Self, LinkHandle)> {
        config.validate()?;

        let bluez = bluer::Session::new().await?;
        let name = bluez
            .adapter_names()
            .await?
            .into_iter()
            .nth(config.adapter_index)
            .ok_or(BleLinkError::AdapterNotAvailable)?;
        let adapter = bluez.adapter(&name)?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        let queue = WriteQueue::new(config.write_queue_depth, config.default_max_payload);
        let advertiser = Advertiser::new(link_config, queue)?;

        let (commands_tx, commands) = mpsc::channel(config.event_buffer);
        let (gatt_tx, gatt_rx) = mpsc::channel(config.event_buffer);
        let handle = LinkHandle::new(commands_tx, advertiser.tracker().subscribe());

        let session = PeripheralSession {
            adapter,
            advertiser,
            gatt_tx,
            app_handle: None,
            adv_handle: None,
            sessions: Vec::new(),
            addresses: HashMap::new(),
            deferred: VecDeque::new(),
        };
        Ok((
            Self {
                session,
                commands,
                gatt_rx,
            },
            handle,
        ))
    }
}

#[async_trait]
impl LinkDriver for PeripheralLink {
    async fn run(self) -> Result<()> {
        let PeripheralLink {
            mut session,
            mut commands,
            mut gatt_rx,
        } = self;

        let adapter_events = session
            .adapter
            .events()
            .await
            .map_err(|e| BleLinkError::EventStreamFailed(e.to_string()))?;
        tokio::pin!(adapter_events);

        let radio = if session.adapter.is_powered().await? {
            RadioState::PoweredOn
        } else {
            RadioState::PoweredOff
        };
        session
            .dispatch(AdvertiserEvent::RadioStateChanged(radio))
            .await;

        let mut prune = tokio::time::interval(SESSION_PRUNE_INTERVAL);
        info!("BLE peripheral link running");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(LinkCommand::Shutdown) | None => break,
                        Some(command) => session.on_command(command).await,
                    }
                }

                Some(event) = adapter_events.next() => {
                    if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
                        let radio = if powered { RadioState::PoweredOn } else { RadioState::PoweredOff };
                        session.dispatch(AdvertiserEvent::RadioStateChanged(radio)).await;
                    }
                }

                Some(event) = gatt_rx.recv() => {
                    session.on_gatt(event).await;
                }

                _ = prune.tick() => {
                    session.prune_stopped().await;
                }
            }
        }

        let effects = session.advertiser.stop();
        session.execute(effects).await;
        session.sessions.clear();
        session.app_handle = None;
        info!("BLE peripheral link stopped");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Event Loop Internals
// ----------------------------------------------------------------------------

impl PeripheralSession {
    async fn on_command(&mut self, command: LinkCommand) {
        let effects = match command {
            LinkCommand::StartAdvertising(label) => self.advertiser.start_advertising(label),
            LinkCommand::Send(text) => {
                self.advertiser.send(text);
                AdvertiserEffects::new()
            }
            LinkCommand::Stop => self.advertiser.stop(),
            LinkCommand::StartDiscovery | LinkCommand::Connect(_) => {
                warn!("scanning is not available in the peripheral role");
                AdvertiserEffects::new()
            }
            LinkCommand::Shutdown => AdvertiserEffects::new(),
        };
        self.execute(effects).await;
        self.drain_deferred().await;
    }

    async fn on_gatt(&mut self, event: GattEvent) {
        match event {
            GattEvent::Subscribed(notifier) => {
                let endpoint = EndpointId::random();
                debug!(%endpoint, "notification session opened");
                self.sessions.push(NotifySession {
                    endpoint,
                    notifier,
                    address: None,
                });
                self.dispatch(AdvertiserEvent::Subscribed { endpoint }).await;
            }
            GattEvent::Write {
                address,
                mtu,
                bytes,
            } => {
                let endpoint = self.endpoint_for(address);
                if self.advertiser.subscribers().last() == Some(&endpoint) {
                    self.advertiser
                        .sink_mut()
                        .set_max_payload(payload_for_att_mtu(mtu));
                }
                self.dispatch(AdvertiserEvent::WriteReceived { endpoint, bytes })
                    .await;
            }
        }
    }

    /// Attribute a writer to a notification session
    ///
    /// BlueZ does not say which device opened a notify session, so an
    /// unknown address is bound to the newest session still unbound.
    fn endpoint_for(&mut self, address: Address) -> EndpointId {
        if let Some(endpoint) = self.addresses.get(&address) {
            return *endpoint;
        }
        let endpoint = match self
            .sessions
            .iter_mut()
            .rev()
            .find(|session| session.address.is_none())
        {
            Some(session) => {
                session.address = Some(address);
                session.endpoint
            }
            None => endpoint_from_address(address),
        };
        debug!(%address, %endpoint, "bound writer");
        self.addresses.insert(address, endpoint);
        endpoint
    }

    async fn dispatch(&mut self, event: AdvertiserEvent) {
        self.deferred.push_front(event);
        self.drain_deferred().await;
    }

    async fn drain_deferred(&mut self) {
        while let Some(event) = self.deferred.pop_front() {
            let effects = self.advertiser.handle(event);
            self.execute(effects).await;
        }
    }

    async fn execute(&mut self, effects: AdvertiserEffects) {
        for effect in effects {
            self.perform(effect).await;
        }
        self.flush().await;
        self.forget_departed();
    }

    async fn perform(&mut self, effect: AdvertiserEffect) {
        debug!(?effect, "performing");
        match effect {
            AdvertiserEffect::PublishChannel { channel } => {
                self.app_handle = None;
                let application = self.chat_application(channel);
                let error = match self.adapter.serve_gatt_application(application).await {
                    Ok(handle) => {
                        self.app_handle = Some(handle);
                        info!("GATT service registered");
                        None
                    }
                    Err(e) => Some(e.to_string()),
                };
                self.deferred
                    .push_back(AdvertiserEvent::ChannelPublished { error });
            }

            AdvertiserEffect::StartAdvertising { label, service } => {
                self.adv_handle = None;
                let advertisement = chat_advertisement(label, service);
                let error = match self.adapter.advertise(advertisement).await {
                    Ok(handle) => {
                        self.adv_handle = Some(handle);
                        None
                    }
                    Err(e) => Some(e.to_string()),
                };
                self.deferred
                    .push_back(AdvertiserEvent::AdvertisingStarted { error });
            }

            AdvertiserEffect::StopAdvertising => {
                if self.adv_handle.take().is_some() {
                    info!("BLE advertising stopped");
                }
            }
        }
    }

    /// Notify queued chunks to the current subscriber
    async fn flush(&mut self) {
        loop {
            while let Some(chunk) = self.advertiser.sink_mut().pop() {
                let Some(target) = self.advertiser.subscribers().last().copied() else {
                    break;
                };
                let Some(session) = self.sessions.iter_mut().find(|s| s.endpoint == target)
                else {
                    break;
                };
                debug!(endpoint = %target, bytes = chunk.len(), data = %hex::encode(&chunk), "notifying chunk");
                if let Err(e) = session.notifier.notify(chunk).await {
                    warn!(endpoint = %target, "Failed to send notification: {}", e);
                    self.advertiser.sink_mut().clear();
                    self.deferred
                        .push_back(AdvertiserEvent::Unsubscribed { endpoint: target });
                    return;
                }
            }
            if !self.advertiser.sink_mut().resume_needed() {
                break;
            }
            let effects = self
                .advertiser
                .handle(AdvertiserEvent::WriteCapacityAvailable);
            for effect in effects {
                self.perform(effect).await;
            }
        }
    }

    /// Drop notifiers the advertiser no longer tracks
    fn forget_departed(&mut self) {
        let subscribers = self.advertiser.subscribers();
        let addresses = &mut self.addresses;
        self.sessions.retain(|session| {
            let keep = subscribers.contains(&session.endpoint);
            if !keep {
                if let Some(address) = session.address {
                    addresses.remove(&address);
                }
            }
            keep
        });
    }

    async fn prune_stopped(&mut self) {
        let stopped: Vec<EndpointId> = self
            .sessions
            .iter()
            .filter(|session| session.notifier.is_stopped())
            .map(|session| session.endpoint)
            .collect();
        for endpoint in stopped {
            self.dispatch(AdvertiserEvent::Unsubscribed { endpoint }).await;
        }
    }

    fn chat_application(&self, channel: ChannelIdentity) -> Application {
        let writes = self.gatt_tx.clone();
        let subscriptions = self.gatt_tx.clone();

        let characteristic = Characteristic {
            uuid: channel.characteristic_id,
            write: Some(CharacteristicWrite {
                write_without_response: true,
                method: CharacteristicWriteMethod::Fun(Box::new(
                    move |bytes: Vec<u8>, req: CharacteristicWriteRequest| {
                        let writes = writes.clone();
                        Box::pin(async move {
                            writes
                                .send(GattEvent::Write {
                                    address: req.device_address,
                                    mtu: req.mtu,
                                    bytes,
                                })
                                .await
                                .map_err(|_| ReqError::Failed)
                        })
                    },
                )),
                ..Default::default()
            }),
            notify: Some(CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                    let subscriptions = subscriptions.clone();
                    Box::pin(async move {
                        let _ = subscriptions.send(GattEvent::Subscribed(notifier)).await;
                    })
                })),
                ..Default::default()
            }),
            ..Default::default()
        };

        Application {
            services: vec![Service {
                uuid: channel.service_id,
                primary: true,
                characteristics: vec![characteristic],
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn chat_advertisement(label: String, service: Uuid) -> Advertisement {
    Advertisement {
        advertisement_type: AdvertisementType::Peripheral,
        service_uuids: vec![service].into_iter().collect(),
        discoverable: Some(true),
        local_name: Some(label),
        ..Default::default()
    }
}

/// Stable endpoint for a writer with no notification session
fn endpoint_from_address(address: Address) -> EndpointId {
    let mut bytes = [0u8; 16];
    bytes[10..].copy_from_slice(&address.0);
    EndpointId::from_uuid(Uuid::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_endpoints_are_stable_and_distinct() {
        let a = Address([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]);
        let b = Address([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x14]);
        assert_eq!(endpoint_from_address(a), endpoint_from_address(a));
        assert_ne!(endpoint_from_address(a), endpoint_from_address(b));
    }

    #[test]
    fn advertisement_carries_label_and_service() {
        let service = ChannelIdentity::CHAT.service_id;
        let advertisement = chat_advertisement("Lobby".to_string(), service);
        assert_eq!(advertisement.local_name.as_deref(), Some("Lobby"));
        assert!(advertisement.service_uuids.contains(&service));
        assert_eq!(advertisement.discoverable, Some(true));
    }
}
