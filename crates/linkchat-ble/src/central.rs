//! Initiator driver over btleplug (central mode)
//!
//! Runs a [`Scanner`] on one task. Adapter events and the results of
//! spawned radio operations are translated into [`ScannerEvent`]s; the
//! returned [`ScannerEffect`]s are carried out against the adapter. Outbound
//! chunks collect in a bounded [`WriteQueue`] that is flushed to the chat
//! characteristic with write-without-response.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use linkchat_core::{
    ChannelIdentity, ChannelLookup, EndpointId, LinkConfig, RadioState, Scanner, ScannerEffect,
    ScannerEffects, ScannerEvent, WriteQueue,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::BleLinkConfig;
use crate::error::{BleLinkError, Result};
use crate::handle::{LinkCommand, LinkDriver, LinkHandle};

// ----------------------------------------------------------------------------
// Central Link
// ----------------------------------------------------------------------------

/// Initiator role bound to a btleplug adapter
pub struct CentralLink {
    session: CentralSession,
    commands: mpsc::Receiver<LinkCommand>,
    events_rx: mpsc::Receiver<ScannerEvent>,
}

/// Everything the event loop mutates
struct CentralSession {
    config: BleLinkConfig,
    channel: ChannelIdentity,
    adapter: Adapter,
    scanner: Scanner<WriteQueue>,
    events_tx: mpsc::Sender<ScannerEvent>,
    peripherals: HashMap<EndpointId, Peripheral>,
    endpoints: HashMap<PeripheralId, EndpointId>,
    /// Task forwarding notifications from the current remote
    notify_task: Option<JoinHandle<()>>,
}

impl CentralLink {
    /// Bind to the configured adapter
    pub async fn new(config: BleLinkConfig, link_config: LinkConfig) -> Result<(Self, LinkHandle)> {
        config.validate()?;

        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .nth(config.adapter_index)
            .ok_or(BleLinkError::AdapterNotAvailable)?;

        let queue = WriteQueue::new(config.write_queue_depth, config.default_max_payload);
        let scanner = Scanner::new(link_config, queue)?;

        let (commands_tx, commands) = mpsc::channel(config.event_buffer);
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        let handle = LinkHandle::new(commands_tx, scanner.tracker().subscribe());

        info!(adapter = config.adapter_index, "BLE central adapter initialized");

        let session = CentralSession {
            config,
            channel: ChannelIdentity::CHAT,
            adapter,
            scanner,
            events_tx,
            peripherals: HashMap::new(),
            endpoints: HashMap::new(),
            notify_task: None,
        };
        Ok((
            Self {
                session,
                commands,
                events_rx,
            },
            handle,
        ))
    }
}

#[async_trait]
impl LinkDriver for CentralLink {
    async fn run(self) -> Result<()> {
        let CentralLink {
            mut session,
            mut commands,
            mut events_rx,
        } = self;

        let mut central_events = session
            .adapter
            .events()
            .await
            .map_err(|e| BleLinkError::EventStreamFailed(e.to_string()))?;

        // btleplug has no power-state stream; an adapter that yields an
        // event stream is usable
        session
            .dispatch(ScannerEvent::RadioStateChanged(RadioState::PoweredOn))
            .await;

        info!("BLE central link running");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(LinkCommand::Shutdown) | None => break,
                        Some(command) => session.on_command(command).await,
                    }
                }

                Some(event) = central_events.next() => {
                    if let Some(event) = session.translate(event).await {
                        session.dispatch(event).await;
                    }
                }

                Some(event) = events_rx.recv() => {
                    session.dispatch(event).await;
                }
            }
        }

        let effects = session.scanner.stop();
        session.execute(effects).await;
        info!("BLE central link stopped");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Event Loop Internals
// ----------------------------------------------------------------------------

impl CentralSession {
    async fn on_command(&mut self, command: LinkCommand) {
        let effects = match command {
            LinkCommand::StartDiscovery => self.scanner.start_discovery(),
            LinkCommand::Connect(peer) => self.scanner.connect(peer),
            LinkCommand::Send(text) => {
                self.scanner.send(text);
                ScannerEffects::new()
            }
            LinkCommand::Stop => self.scanner.stop(),
            LinkCommand::StartAdvertising(_) => {
                warn!("advertising is not available in the central role");
                ScannerEffects::new()
            }
            LinkCommand::Shutdown => ScannerEffects::new(),
        };
        self.execute(effects).await;
    }

    async fn dispatch(&mut self, event: ScannerEvent) {
        let effects = self.scanner.handle(event);
        self.execute(effects).await;
    }

    async fn execute(&mut self, effects: ScannerEffects) {
        for effect in effects {
            self.perform(effect).await;
        }
        self.flush().await;
    }

    /// Map an adapter event onto the scanner's vocabulary
    async fn translate(&mut self, event: CentralEvent) -> Option<ScannerEvent> {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let peripheral = self.adapter.peripheral(&id).await.ok()?;
                let properties = peripheral.properties().await.ok()??;
                // Some backends ignore the scan filter
                if !properties.services.contains(&self.channel.service_id) {
                    return None;
                }
                let peer = self.endpoint_for(id, peripheral);
                Some(ScannerEvent::PeerDiscovered {
                    peer,
                    advertised_name: properties.local_name,
                    device_name: None,
                    rssi: properties.rssi,
                })
            }
            CentralEvent::DeviceDisconnected(id) => {
                let peer = *self.endpoints.get(&id)?;
                if self.scanner.remote() == Some(peer) {
                    self.stop_notifications();
                }
                Some(ScannerEvent::Disconnected { peer, reason: None })
            }
            _ => None,
        }
    }

    fn endpoint_for(&mut self, id: PeripheralId, peripheral: Peripheral) -> EndpointId {
        let peer = *self
            .endpoints
            .entry(id)
            .or_insert_with(EndpointId::random);
        self.peripherals.insert(peer, peripheral);
        peer
    }

    async fn perform(&mut self, effect: ScannerEffect) {
        debug!(?effect, "performing");
        match effect {
            ScannerEffect::StartScan { service } => {
                let filter = ScanFilter {
                    services: vec![service],
                };
                if let Err(e) = self.adapter.start_scan(filter).await {
                    error!("Failed to start BLE scan: {}", e);
                }
            }

            ScannerEffect::StopScan => {
                if let Err(e) = self.adapter.stop_scan().await {
                    warn!("Failed to stop BLE scan: {}", e);
                }
            }

            ScannerEffect::Connect { peer } => {
                let Some(peripheral) = self.peripherals.get(&peer).cloned() else {
                    self.report(ScannerEvent::ConnectFailed {
                        peer,
                        reason: "peripheral no longer known".to_string(),
                    });
                    return;
                };
                let events = self.events_tx.clone();
                let limit = self.config.connect_timeout;
                tokio::spawn(async move {
                    let event = match bounded(limit, peripheral.connect()).await {
                        Ok(()) => ScannerEvent::Connected { peer },
                        Err(reason) => {
                            // Abandon the attempt so the stack does not finish it later
                            let _ = peripheral.disconnect().await;
                            ScannerEvent::ConnectFailed { peer, reason }
                        }
                    };
                    let _ = events.send(event).await;
                });
            }

            ScannerEffect::DiscoverChannel { peer, channel } => {
                let Some(peripheral) = self.peripherals.get(&peer).cloned() else {
                    return;
                };
                let events = self.events_tx.clone();
                let limit = self.config.channel_discovery_timeout;
                tokio::spawn(async move {
                    let outcome = match bounded(limit, peripheral.discover_services()).await {
                        Ok(()) if find_channel(&peripheral, &channel).is_some() => {
                            ChannelLookup::Found
                        }
                        Ok(()) => ChannelLookup::NotFound,
                        Err(reason) => ChannelLookup::Error(reason),
                    };
                    let _ = events
                        .send(ScannerEvent::ChannelDiscovered { peer, outcome })
                        .await;
                });
            }

            ScannerEffect::SetNotify {
                peer,
                enabled: true,
            } => self.start_notifications(peer),

            ScannerEffect::SetNotify {
                peer,
                enabled: false,
            } => {
                self.stop_notifications();
                let Some(peripheral) = self.peripherals.get(&peer) else {
                    return;
                };
                if let Some(characteristic) = find_channel(peripheral, &self.channel) {
                    if let Err(e) = peripheral.unsubscribe(&characteristic).await {
                        warn!(%peer, "Failed to unsubscribe: {}", e);
                    }
                }
            }

            ScannerEffect::CancelConnection { peer } => {
                self.stop_notifications();
                if let Some(peripheral) = self.peripherals.get(&peer) {
                    if let Err(e) = peripheral.disconnect().await {
                        warn!(%peer, "Failed to disconnect: {}", e);
                    }
                    info!(%peer, "disconnected from peer");
                }
            }
        }
    }

    /// Subscribe, then forward notifications until the stream ends
    fn start_notifications(&mut self, peer: EndpointId) {
        self.stop_notifications();
        let Some(peripheral) = self.peripherals.get(&peer).cloned() else {
            return;
        };
        let events = self.events_tx.clone();
        let channel = self.channel;

        self.notify_task = Some(tokio::spawn(async move {
            let Some(characteristic) = find_channel(&peripheral, &channel) else {
                let _ = events
                    .send(ScannerEvent::SubscribeFailed {
                        peer,
                        reason: "chat characteristic missing".to_string(),
                    })
                    .await;
                return;
            };

            let mut notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = events
                        .send(ScannerEvent::SubscribeFailed {
                            peer,
                            reason: format!("Failed to get notifications stream: {}", e),
                        })
                        .await;
                    return;
                }
            };
            if let Err(e) = peripheral.subscribe(&characteristic).await {
                let _ = events
                    .send(ScannerEvent::SubscribeFailed {
                        peer,
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
            if events
                .send(ScannerEvent::SubscriptionChanged {
                    peer,
                    notifying: true,
                })
                .await
                .is_err()
            {
                return;
            }

            while let Some(notification) = notifications.next().await {
                if notification.uuid != characteristic.uuid {
                    continue;
                }
                let event = ScannerEvent::DataReceived {
                    peer,
                    bytes: notification.value,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            debug!(%peer, "notification stream ended");
        }));
    }

    fn stop_notifications(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
    }

    /// Hand queued chunks to the radio, resuming the engine whenever a
    /// refused write left room behind
    async fn flush(&mut self) {
        loop {
            while let Some(chunk) = self.scanner.sink_mut().pop() {
                self.write_chunk(&chunk).await;
            }
            if !self.scanner.sink_mut().resume_needed() {
                break;
            }
            let effects = self.scanner.handle(ScannerEvent::WriteCapacityAvailable);
            for effect in effects {
                self.perform(effect).await;
            }
        }
    }

    async fn write_chunk(&self, chunk: &[u8]) {
        let Some(peer) = self.scanner.remote() else {
            return;
        };
        let Some(peripheral) = self.peripherals.get(&peer) else {
            return;
        };
        let Some(characteristic) = find_channel(peripheral, &self.channel) else {
            warn!(%peer, "chat characteristic missing, dropping chunk");
            return;
        };
        debug!(%peer, bytes = chunk.len(), data = %hex::encode(chunk), "writing chunk");
        if let Err(e) = peripheral
            .write(&characteristic, chunk, WriteType::WithoutResponse)
            .await
        {
            warn!(%peer, "Failed to write to characteristic: {}", e);
        }
    }

    /// Queue an event produced while performing an effect
    fn report(&self, event: ScannerEvent) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let _ = events.send(event).await;
        });
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn find_channel(peripheral: &Peripheral, channel: &ChannelIdentity) -> Option<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| channel.matches(&c.service_uuid, &c.uuid))
}

/// Await a radio operation, optionally bounded by `limit`
async fn bounded<T, E, F>(limit: Option<Duration>, operation: F) -> std::result::Result<T, String>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    match limit {
        Some(limit) => match timeout(limit, operation).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", limit)),
        },
        None => operation.await.map_err(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_results_through() {
        let ok: std::result::Result<u8, String> =
            bounded(Some(Duration::from_secs(1)), async { Ok::<_, String>(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: std::result::Result<u8, String> =
            bounded(None, async { Err::<u8, _>("refused") }).await;
        assert_eq!(err, Err("refused".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_times_out() {
        let result: std::result::Result<(), String> = bounded(
            Some(Duration::from_millis(50)),
            std::future::pending::<std::result::Result<(), String>>(),
        )
        .await;
        assert!(result.unwrap_err().starts_with("timed out"));
    }
}
