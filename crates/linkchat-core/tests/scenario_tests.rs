//! End-to-end scenarios with both roles wired back to back

mod test_utils;

use linkchat_core::{
    AdvertiserEvent, ChatStatus, ConnectStatus, ConnectionPhase, Direction, Framing, LinkConfig,
    ScannerEvent, SendPolicy, EOM_SENTINEL,
};
use test_utils::{LinkHarness, MockSink, CENTRAL, PERIPHERAL};

fn texts(harness: &LinkHarness, direction: Direction, scanner_side: bool) -> Vec<String> {
    let snapshot = if scanner_side {
        harness.scanner.snapshot()
    } else {
        harness.advertiser.snapshot()
    };
    snapshot
        .history
        .iter()
        .filter(|entry| entry.direction == direction)
        .map(|entry| entry.message.text().to_string())
        .collect()
}

#[test]
fn happy_path_reaches_active_and_relays() {
    let mut harness = LinkHarness::connected(LinkConfig::default(), 20);

    assert_eq!(harness.scanner.phase(), ConnectionPhase::Active);
    assert_eq!(harness.advertiser.phase(), ConnectionPhase::Active);
    assert_eq!(harness.advertiser.snapshot().remote, Some(CENTRAL));
    assert_eq!(harness.scanner.snapshot().remote, Some(PERIPHERAL));
    assert_eq!(
        harness.scanner.snapshot().connect_status,
        ConnectStatus::Subscribed
    );

    harness.scanner.send("hello");
    harness.pump();

    assert_eq!(texts(&harness, Direction::Received, false), vec!["hello"]);
    assert_eq!(texts(&harness, Direction::Sent, false), vec!["hello"]);
    assert_eq!(texts(&harness, Direction::Sent, true), vec!["hello"]);
    // The Responder's echo comes back to the sender
    assert_eq!(texts(&harness, Direction::Received, true), vec!["hello"]);
    assert_eq!(
        harness.scanner.snapshot().chat_status,
        ChatStatus::SuccessToSend
    );
}

#[test]
fn mtu_forces_fragmentation() {
    let mut harness = LinkHarness::connected(LinkConfig::default(), 4);

    harness.scanner.send("hello world");
    assert_eq!(
        harness.scanner.sink().writes(),
        &[
            b"hell".to_vec(),
            b"o wo".to_vec(),
            b"rld".to_vec(),
            EOM_SENTINEL.to_vec()
        ]
    );

    harness.pump();
    assert_eq!(
        harness
            .advertiser
            .snapshot()
            .last_received
            .map(|m| m.into_text()),
        Some("hello world".to_string())
    );
}

#[test]
fn backpressure_resumes_without_gaps_or_duplicates() {
    let mut harness = LinkHarness::connected(LinkConfig::default(), 4);
    *harness.scanner.sink_mut() = MockSink::with_budget(4, 1);

    harness.scanner.send("hello world");
    assert_eq!(harness.scanner.sink().writes().len(), 1);
    assert_eq!(harness.scanner.sink().refusals(), 1);

    // A readiness signal with nothing granted writes nothing
    harness.scanner.handle(ScannerEvent::WriteCapacityAvailable);
    assert_eq!(harness.scanner.sink().writes().len(), 1);

    harness.scanner.sink_mut().grant(1);
    harness.scanner.handle(ScannerEvent::WriteCapacityAvailable);
    harness.scanner.sink_mut().unlimited();
    harness.scanner.handle(ScannerEvent::WriteCapacityAvailable);

    let writes = harness.scanner.sink().writes();
    assert_eq!(writes.len(), 4);
    assert_eq!(writes[..3].concat(), b"hello world");
    assert_eq!(writes[3], EOM_SENTINEL);

    // Late readiness after completion is harmless
    harness.scanner.handle(ScannerEvent::WriteCapacityAvailable);
    assert_eq!(harness.scanner.sink().writes().len(), 4);
}

#[test]
fn disconnect_mid_transfer_aborts_and_next_send_starts_fresh() {
    let mut harness = LinkHarness::connected(LinkConfig::default(), 4);
    *harness.scanner.sink_mut() = MockSink::with_budget(4, 2);

    harness.scanner.send("abcdefghijklmnop");
    assert_eq!(harness.scanner.sink().writes().len(), 2);
    harness.pump();

    assert_eq!(harness.scanner.snapshot().chat_status, ChatStatus::None);
    harness.disconnect();
    assert_eq!(harness.scanner.phase(), ConnectionPhase::Scanning);
    assert_eq!(harness.advertiser.phase(), ConnectionPhase::Advertising);
    assert_eq!(
        harness.scanner.snapshot().chat_status,
        ChatStatus::FailToSend
    );

    harness.scanner.sink_mut().grant(10);
    harness.scanner.handle(ScannerEvent::WriteCapacityAvailable);
    assert_eq!(harness.scanner.sink().writes().len(), 2);

    harness.establish();
    harness.scanner.send("again");
    let writes = harness.scanner.sink().writes();
    assert_eq!(writes[2], b"agai");
    harness.pump();

    let received = texts(&harness, Direction::Received, false);
    assert_eq!(received, vec!["again"]);
}

#[test]
fn unsubscribe_mid_echo_reports_fail_to_send() {
    let mut harness = LinkHarness::connected(LinkConfig::default(), 4);
    *harness.advertiser.sink_mut() = MockSink::with_budget(4, 2);

    harness.scanner.send("abcdefghijklmnop");
    harness.pump();
    assert_eq!(harness.advertiser.sink().writes().len(), 2);
    assert_eq!(
        harness.advertiser.snapshot().chat_status,
        ChatStatus::SuccessToSend
    );

    harness.disconnect();
    assert_eq!(
        harness.advertiser.snapshot().chat_status,
        ChatStatus::FailToSend
    );
    assert!(texts(&harness, Direction::Sent, false).is_empty());
}

#[test]
fn stop_is_idempotent_for_both_roles() {
    let mut harness = LinkHarness::connected(LinkConfig::default(), 20);

    harness.scanner.stop();
    harness.scanner.stop();
    assert_eq!(harness.scanner.phase(), ConnectionPhase::Idle);

    harness.advertiser.stop();
    harness.advertiser.stop();
    harness
        .advertiser
        .handle(AdvertiserEvent::Unsubscribed { endpoint: CENTRAL });
    assert_eq!(harness.advertiser.phase(), ConnectionPhase::Disconnected);

    let mut idle = LinkHarness::new(LinkConfig::default(), 20);
    assert!(idle.scanner.stop().is_empty());
    assert!(idle.advertiser.stop().is_empty());
    assert_eq!(idle.scanner.phase(), ConnectionPhase::Idle);
    assert_eq!(idle.advertiser.phase(), ConnectionPhase::Idle);
}

#[test]
fn responder_to_initiator_direction_reassembles() {
    let mut harness = LinkHarness::connected(LinkConfig::default(), 5);

    harness.advertiser.send("Host: welcome to the room");
    harness.pump();

    assert_eq!(
        texts(&harness, Direction::Received, true),
        vec!["Host: welcome to the room"]
    );
}

#[test]
fn queue_policy_delivers_every_message_in_order() {
    let config = LinkConfig::default().with_send_policy(SendPolicy::Queue);
    let mut harness = LinkHarness::connected(config, 4);
    *harness.scanner.sink_mut() = MockSink::with_budget(4, 1);

    harness.scanner.send("first");
    harness.scanner.send("second");
    harness.scanner.sink_mut().unlimited();
    harness.scanner.handle(ScannerEvent::WriteCapacityAvailable);
    harness.pump();

    assert_eq!(
        texts(&harness, Direction::Received, false),
        vec!["first", "second"]
    );
}

#[test]
fn latest_wins_splices_partial_message_on_the_wire() {
    let mut harness = LinkHarness::connected(LinkConfig::default(), 4);
    *harness.scanner.sink_mut() = MockSink::with_budget(4, 1);

    harness.scanner.send("first message");
    harness.scanner.send("second");
    harness.scanner.sink_mut().unlimited();
    harness.scanner.handle(ScannerEvent::WriteCapacityAvailable);
    harness.pump();

    // The chunk already on the air stays in the receiver's buffer
    assert_eq!(
        texts(&harness, Direction::Received, false),
        vec!["firssecond"]
    );
    assert_eq!(texts(&harness, Direction::Sent, true), vec!["second"]);
}

#[test]
fn sentinel_text_arrives_intact() {
    let mut harness = LinkHarness::connected(LinkConfig::default(), 20);

    harness.scanner.send("EOM");
    harness.pump();

    assert_eq!(texts(&harness, Direction::Received, false), vec!["EOM"]);
    assert_eq!(texts(&harness, Direction::Received, true), vec!["EOM"]);
}

#[test]
fn length_prefixed_framing_carries_sentinel_text() {
    let config = LinkConfig::default().with_framing(Framing::LengthPrefixed);
    let mut harness = LinkHarness::connected(config, 3);

    harness.scanner.send("EOM");
    harness.pump();

    assert_eq!(texts(&harness, Direction::Received, false), vec!["EOM"]);
    assert_eq!(texts(&harness, Direction::Received, true), vec!["EOM"]);
}

#[test]
fn per_write_responder_splits_multi_chunk_messages() {
    let mut harness = LinkHarness::connected(LinkConfig::compatible(), 4);

    harness.scanner.send("hello world");
    harness.scanner.sink_mut().take_new();
    let writes: Vec<Vec<u8>> = harness.scanner.sink().writes().to_vec();
    for bytes in writes {
        harness.advertiser.handle(AdvertiserEvent::WriteReceived {
            endpoint: CENTRAL,
            bytes,
        });
    }

    assert_eq!(
        texts(&harness, Direction::Received, false),
        vec!["hell", "o wo", "rld"]
    );
}

#[test]
fn mtu_change_mid_connection_applies_to_next_write() {
    let mut harness = LinkHarness::connected(LinkConfig::default(), 4);
    *harness.scanner.sink_mut() = MockSink::with_budget(4, 1);

    harness.scanner.send("abcdefghij");
    harness.scanner.sink_mut().set_mtu(8);
    harness.scanner.sink_mut().unlimited();
    harness.scanner.handle(ScannerEvent::WriteCapacityAvailable);

    assert_eq!(
        harness.scanner.sink().writes(),
        &[b"abcd".to_vec(), b"efghij".to_vec(), EOM_SENTINEL.to_vec()]
    );
}

#[test]
fn unsubscribed_sender_name_is_reported() {
    let mut harness = LinkHarness::connected(LinkConfig::default(), 20);

    harness.scanner.send("Alice: hi there");
    harness.pump();
    assert_eq!(harness.advertiser.display_name(&CENTRAL), Some("Alice"));

    harness.disconnect();
    assert_eq!(
        harness.advertiser.snapshot().connect_status,
        ConnectStatus::Disconnected {
            user_name: Some("Alice".to_string())
        }
    );
}
