//! Test utilities for driving both link roles without a radio
//!
//! `MockSink` is a scripted write primitive with a programmable MTU and
//! write budget. `LinkHarness` wires a Scanner and an Advertiser back to back
//! so chunks written by one role are delivered to the other.

#![allow(dead_code)]

use linkchat_core::{
    Advertiser, AdvertiserEvent, ChannelLookup, ChunkSink, EndpointId, LinkConfig, RadioState,
    Scanner, ScannerEvent, WriteOutcome,
};

// ----------------------------------------------------------------------------
// Mock Sink
// ----------------------------------------------------------------------------

/// Sink that records every accepted write
///
/// With a budget set, the sink accepts that many writes and then reports
/// `Busy` until more capacity is granted.
#[derive(Debug, Clone)]
pub struct MockSink {
    mtu: usize,
    budget: Option<usize>,
    writes: Vec<Vec<u8>>,
    delivered: usize,
    refusals: usize,
}

impl MockSink {
    /// Unlimited capacity at the given MTU
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu,
            budget: None,
            writes: Vec::new(),
            delivered: 0,
            refusals: 0,
        }
    }

    /// Accept `budget` writes, then refuse
    pub fn with_budget(mtu: usize, budget: usize) -> Self {
        Self {
            budget: Some(budget),
            ..Self::new(mtu)
        }
    }

    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu;
    }

    /// Allow `count` more writes
    pub fn grant(&mut self, count: usize) {
        self.budget = Some(self.budget.unwrap_or(0) + count);
    }

    pub fn unlimited(&mut self) {
        self.budget = None;
    }

    /// Every write accepted so far
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    pub fn refusals(&self) -> usize {
        self.refusals
    }

    /// Writes not yet handed over by `take_new`
    pub fn take_new(&mut self) -> Vec<Vec<u8>> {
        let fresh = self.writes[self.delivered..].to_vec();
        self.delivered = self.writes.len();
        fresh
    }

    /// Concatenated payload of all writes
    pub fn joined(&self) -> Vec<u8> {
        self.writes.concat()
    }
}

impl ChunkSink for MockSink {
    fn max_payload_len(&self) -> usize {
        self.mtu
    }

    fn try_write(&mut self, chunk: &[u8]) -> WriteOutcome {
        match self.budget {
            Some(0) => {
                self.refusals += 1;
                WriteOutcome::Busy
            }
            Some(ref mut remaining) => {
                *remaining -= 1;
                self.writes.push(chunk.to_vec());
                WriteOutcome::Accepted
            }
            None => {
                self.writes.push(chunk.to_vec());
                WriteOutcome::Accepted
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Two-Role Harness
// ----------------------------------------------------------------------------

pub const CENTRAL: EndpointId = EndpointId::from_u128(0xC0);
pub const PERIPHERAL: EndpointId = EndpointId::from_u128(0xA0);
pub const ROOM: &str = "Lobby";

/// A Scanner and an Advertiser joined by in-memory sinks
pub struct LinkHarness {
    pub scanner: Scanner<MockSink>,
    pub advertiser: Advertiser<MockSink>,
}

impl LinkHarness {
    pub fn new(config: LinkConfig, mtu: usize) -> Self {
        Self {
            scanner: Scanner::new(config.clone(), MockSink::new(mtu)).unwrap(),
            advertiser: Advertiser::new(config, MockSink::new(mtu)).unwrap(),
        }
    }

    /// Power both radios, advertise and start discovery
    pub fn power_on(&mut self) {
        self.advertiser
            .handle(AdvertiserEvent::RadioStateChanged(RadioState::PoweredOn));
        self.advertiser.start_advertising(ROOM);
        self.scanner
            .handle(ScannerEvent::RadioStateChanged(RadioState::PoweredOn));
        self.scanner.start_discovery();
    }

    /// Walk both roles through discovery, connect and subscribe
    pub fn establish(&mut self) {
        self.scanner.handle(ScannerEvent::PeerDiscovered {
            peer: PERIPHERAL,
            advertised_name: Some(ROOM.to_string()),
            device_name: None,
            rssi: Some(-50),
        });
        self.scanner.connect(PERIPHERAL);
        self.scanner
            .handle(ScannerEvent::Connected { peer: PERIPHERAL });
        self.scanner.handle(ScannerEvent::ChannelDiscovered {
            peer: PERIPHERAL,
            outcome: ChannelLookup::Found,
        });
        self.advertiser
            .handle(AdvertiserEvent::Subscribed { endpoint: CENTRAL });
        self.scanner.handle(ScannerEvent::SubscriptionChanged {
            peer: PERIPHERAL,
            notifying: true,
        });
    }

    pub fn connected(config: LinkConfig, mtu: usize) -> Self {
        let mut harness = Self::new(config, mtu);
        harness.power_on();
        harness.establish();
        harness
    }

    /// Deliver pending writes in both directions until the link is quiet
    ///
    /// Returns the number of chunks delivered.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let upstream = self.scanner.sink_mut().take_new();
            let downstream = self.advertiser.sink_mut().take_new();
            if upstream.is_empty() && downstream.is_empty() {
                return delivered;
            }
            delivered += upstream.len() + downstream.len();
            for bytes in upstream {
                self.advertiser.handle(AdvertiserEvent::WriteReceived {
                    endpoint: CENTRAL,
                    bytes,
                });
            }
            for bytes in downstream {
                self.scanner.handle(ScannerEvent::DataReceived {
                    peer: PERIPHERAL,
                    bytes,
                });
            }
        }
    }

    /// Drop the link from both sides
    pub fn disconnect(&mut self) {
        self.advertiser
            .handle(AdvertiserEvent::Unsubscribed { endpoint: CENTRAL });
        self.scanner.handle(ScannerEvent::Disconnected {
            peer: PERIPHERAL,
            reason: Some("link lost".to_string()),
        });
    }
}
