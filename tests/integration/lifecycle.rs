use crate::*;

use parcel_engine::{AdmitError, RemovalReason};

fn short_lived() -> TransferSettings {
    TransferSettings {
        max_age_ticks: 5,
        ..default_settings()
    }
}

#[test]
fn test_unconsumed_incoming_expires_once() {
    let mut pair = Pair::new(short_lived());
    pair.sender.begin_outgoing(random_blob(100), RECEIVER).unwrap();

    // Completes on the first tick, then ages one per tick after that.
    for _ in 0..5 {
        pair.step();
    }
    let handle = pair.receiver_completed().unwrap();
    assert!(pair.receiver.incoming_progress(handle).unwrap().is_complete());

    pair.step();
    assert_eq!(pair.receiver.incoming_progress(handle), None);
    assert_eq!(pair.receiver.take_incoming(handle), None);

    for _ in 0..5 {
        pair.step();
    }
    let removals: Vec<_> = pair
        .receiver_events
        .iter()
        .filter(|e| matches!(e, TransferEvent::IncomingRemoved { .. }))
        .collect();
    assert_eq!(
        removals,
        vec![&TransferEvent::IncomingRemoved {
            handle,
            reason: RemovalReason::Expired
        }]
    );
    assert_eq!(pair.receiver.stats().expired, 1);
}

#[test]
fn test_unreleased_outgoing_expires() {
    let mut pair = Pair::new(short_lived());
    let out = pair.sender.begin_outgoing(random_blob(100), RECEIVER).unwrap();

    pair.step();
    pair.run_until(20, |p| p.sender.outgoing().is_empty());

    assert_eq!(pair.ticks, 6);
    assert!(pair.sender_events.contains(&TransferEvent::OutgoingCompleted { handle: out }));
    assert!(pair.sender_events.contains(&TransferEvent::OutgoingRemoved {
        handle: out,
        reason: RemovalReason::Expired,
    }));
    // A completed transfer never produces a cancellation notice.
    assert_eq!(pair.sender.stats().notices_sent, 0);
}

#[test]
fn test_consumed_blob_frees_the_record() {
    let mut pair = Pair::new(default_settings());
    pair.sender.begin_outgoing(random_blob(3000), RECEIVER).unwrap();
    pair.run_until(60, |p| p.receiver_completed().is_some());

    let handle = pair.receiver_completed().unwrap();
    assert_eq!(pair.receiver.incoming_payload(handle).map(<[u8]>::len), Some(3000));
    assert!(pair.receiver.take_incoming(handle).is_some());
    assert!(pair.receiver.take_incoming(handle).is_none());

    // Removing an already-consumed handle is a no-op.
    pair.receiver.remove_incoming(handle);
    pair.step();
    assert_eq!(pair.receiver.stats().notices_sent, 0);
    assert_eq!(pair.receiver.stats().incoming_removed, 1);
    assert!(!pair
        .receiver_events
        .iter()
        .any(|e| matches!(e, TransferEvent::IncomingRemoved { .. })));
}

#[test]
fn test_released_outgoing_is_forgotten() {
    let mut pair = Pair::new(default_settings());
    let out = pair.sender.begin_outgoing(random_blob(300), RECEIVER).unwrap();
    pair.step();
    assert!(pair.sender.outgoing_progress(out).unwrap().is_complete());

    pair.sender.remove_outgoing(out);
    pair.step();
    assert_eq!(pair.sender.outgoing_progress(out), None);
    assert_eq!(pair.sender.stats().notices_sent, 0);
    assert!(!pair
        .sender_events
        .iter()
        .any(|e| matches!(e, TransferEvent::OutgoingRemoved { .. })));
}

#[test]
fn test_admission_rejects_empty_blob() {
    let mut pair = Pair::new(default_settings());
    assert_eq!(
        pair.sender.begin_outgoing(Vec::<u8>::new(), RECEIVER),
        Err(AdmitError::EmptyBlob)
    );
    pair.step();
    assert!(pair.sender.outgoing().is_empty());
}

#[test]
fn test_shutdown_releases_both_tables() {
    let mut pair = Pair::new(default_settings());
    pair.sender
        .begin_outgoing(random_blob(64 * 1024), RECEIVER)
        .unwrap();
    pair.step();
    assert_eq!(pair.sender.outgoing().len(), 1);
    assert_eq!(pair.receiver.incoming().len(), 1);

    pair.sender.shutdown();
    pair.receiver.shutdown();
    assert!(pair.sender.outgoing().is_empty());
    assert!(pair.receiver.incoming().is_empty());
}
