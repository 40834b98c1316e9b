use crate::*;

use parcel_core::{ChunkFrame, FRAME_PAYLOAD};
use parcel_engine::RemovalReason;

#[test]
fn test_receiver_cancel_stops_sender() {
    let mut pair = Pair::new(default_settings());
    let out = pair
        .sender
        .begin_outgoing(random_blob(64 * 1024), RECEIVER)
        .unwrap();
    let id = pair.sender.outgoing_transfer_id(out).unwrap();

    for _ in 0..10 {
        pair.step();
    }
    let incoming = pair.receiver_started().unwrap();
    pair.receiver.remove_incoming(incoming);

    // Receiver drops the record and notifies; the sender reacts one tick later.
    pair.step();
    assert!(pair.receiver.incoming().is_empty());
    assert!(pair.receiver.is_canceled(&id));
    assert!(pair.sender.outgoing().contains(&id));

    pair.step();
    assert!(pair.sender.outgoing().is_empty());
    assert!(pair.sender_events.contains(&TransferEvent::OutgoingRemoved {
        handle: out,
        reason: RemovalReason::PeerCanceled,
    }));

    // Frames emitted before the cancel landed did not revive the transfer.
    assert!(pair.receiver.incoming().is_empty());
    assert!(pair.receiver.stats().frames_dropped > 0);

    let sent = pair.total_frame_bytes();
    pair.step();
    pair.step();
    assert_eq!(pair.total_frame_bytes(), sent);
}

#[test]
fn test_sender_cancel_drops_partial_reassembly() {
    let mut pair = Pair::new(default_settings());
    let out = pair
        .sender
        .begin_outgoing(random_blob(64 * 1024), RECEIVER)
        .unwrap();
    let id = pair.sender.outgoing_transfer_id(out).unwrap();

    for _ in 0..5 {
        pair.step();
    }
    let incoming = pair.receiver_started().unwrap();
    pair.sender.remove_outgoing(out);

    // The notice travels with the last frames of the same tick.
    pair.step();
    assert!(pair.sender.outgoing().is_empty());
    assert!(pair.receiver.incoming().is_empty());
    assert!(pair.receiver.is_canceled(&id));
    assert!(pair.receiver_events.contains(&TransferEvent::IncomingRemoved {
        handle: incoming,
        reason: RemovalReason::PeerCanceled,
    }));
    assert_eq!(pair.receiver.incoming_progress(incoming), None);

    // Owner-initiated: the sender gets no removal event of its own.
    assert!(!pair
        .sender_events
        .iter()
        .any(|e| matches!(e, TransferEvent::OutgoingRemoved { .. })));
}

#[test]
fn test_cancel_is_idempotent() {
    let mut pair = Pair::new(default_settings());
    pair.sender
        .begin_outgoing(random_blob(64 * 1024), RECEIVER)
        .unwrap();
    for _ in 0..3 {
        pair.step();
    }
    let incoming = pair.receiver_started().unwrap();

    pair.receiver.remove_incoming(incoming);
    pair.receiver.remove_incoming(incoming);
    pair.step();
    pair.receiver.remove_incoming(incoming);
    pair.step();

    assert_eq!(pair.receiver.stats().notices_sent, 1);
    assert_eq!(pair.receiver.stats().incoming_removed, 1);
}

#[test]
fn test_late_frames_for_canceled_transfer_are_discarded() {
    let mut pair = Pair::new(default_settings());
    let out = pair
        .sender
        .begin_outgoing(random_blob(4096), RECEIVER)
        .unwrap();
    let id = pair.sender.outgoing_transfer_id(out).unwrap();
    pair.step();
    let incoming = pair.receiver_started().unwrap();
    pair.receiver.remove_incoming(incoming);
    pair.step();

    // A straggler replayed long after the cancellation.
    let frame = ChunkFrame::encode(id, &random_blob(4096), 1024, FRAME_PAYLOAD);
    pair.receiver.deliver(SENDER, frame.into());
    let started_before = pair
        .receiver_events
        .iter()
        .filter(|e| matches!(e, TransferEvent::IncomingStarted { .. }))
        .count();
    pair.step();

    let started_after = pair
        .receiver_events
        .iter()
        .filter(|e| matches!(e, TransferEvent::IncomingStarted { .. }))
        .count();
    assert_eq!(started_before, started_after);
    assert!(pair.receiver.incoming().is_empty());
}

#[test]
fn test_unreachable_receiver_drops_outgoing() {
    let mut pair = Pair::new(default_settings());
    let out = pair
        .sender
        .begin_outgoing(random_blob(64 * 1024), RECEIVER)
        .unwrap();
    pair.step();

    pair.sender_wire.down.insert(RECEIVER);
    pair.step();

    assert!(pair.sender.outgoing().is_empty());
    assert_eq!(pair.sender.stats().notices_sent, 0);
    assert!(pair.sender_events.contains(&TransferEvent::OutgoingRemoved {
        handle: out,
        reason: RemovalReason::PeerUnreachable,
    }));
}

#[test]
fn test_removal_before_admission_never_reaches_the_wire() {
    let mut pair = Pair::new(default_settings());
    let out = pair.sender.begin_outgoing(random_blob(1000), RECEIVER).unwrap();
    pair.sender.remove_outgoing(out);
    pair.step();
    pair.step();

    assert_eq!(pair.total_frame_bytes(), 0);
    assert!(pair.receiver_events.is_empty());
    assert_eq!(pair.sender.outgoing_progress(out), None);
}
