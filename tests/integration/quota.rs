use crate::*;

use std::time::Duration;

use parcel_core::FRAME_PAYLOAD;

#[test]
fn test_64k_at_32k_per_second_takes_two_seconds() {
    let mut pair = Pair::new(default_settings());
    pair.sender
        .begin_outgoing(random_blob(64 * 1024), RECEIVER)
        .unwrap();

    let ticks = pair.run_until(200, |p| p.receiver_completed().is_some());

    // The per-tick budget rounds up to 547 bytes (32,820 B/s), so the last
    // frame goes out on tick 120, which is 1.99999992 s of tick time.
    let per_tick = (32 * 1024 * pair.clock.delta().as_nanos()).div_ceil(1_000_000_000);
    assert_eq!(per_tick, 547);
    let fewest = (64 * 1024u128).div_ceil(per_tick) as u64;
    assert_eq!(ticks, fewest, "took {ticks} ticks");
    let elapsed = pair.clock.delta() * ticks as u32;
    assert!(elapsed > Duration::from_millis(1999), "took {elapsed:?}");
    assert!(pair
        .frames_per_tick
        .iter()
        .flatten()
        .all(|len| *len == FRAME_PAYLOAD));
    assert_eq!(pair.total_frame_bytes(), 64 * 1024);
}

#[test]
fn test_cumulative_emission_never_exceeds_accrual() {
    let mut pair = Pair::new(default_settings());
    pair.sender
        .begin_outgoing(random_blob(20_000), RECEIVER)
        .unwrap();
    pair.sender
        .begin_outgoing(random_blob(7_000), RECEIVER)
        .unwrap();

    // 32 KiB/s at 60 Hz accrues 547 bytes per tick.
    let mut sent = 0usize;
    for tick in 1..=60usize {
        pair.step();
        sent += pair.frames_per_tick.last().unwrap().iter().sum::<usize>();
        assert!(sent <= 547 * tick, "tick {tick}: {sent} bytes sent");
    }
}

#[test]
fn test_two_transfers_split_the_quota_evenly() {
    let settings = TransferSettings {
        max_bytes_per_second: 60 * 1024,
        ..default_settings()
    };
    let mut pair = Pair::new(settings);
    let a = pair.sender.begin_outgoing(random_blob(30_000), RECEIVER).unwrap();
    let b = pair.sender.begin_outgoing(random_blob(30_000), RECEIVER).unwrap();

    for _ in 0..10 {
        pair.step();
    }

    let a_sent = pair.sender.outgoing_progress(a).unwrap().transferred_bytes;
    let b_sent = pair.sender.outgoing_progress(b).unwrap().transferred_bytes;
    assert_eq!(a_sent, 5120);
    assert_eq!(b_sent, 5120);
}

#[test]
fn test_bank_drains_when_idle() {
    let mut pair = Pair::new(default_settings());
    pair.sender.begin_outgoing(random_blob(100), RECEIVER).unwrap();

    pair.step();
    assert!(pair.sender.quota_banked() > 0);

    pair.step();
    assert_eq!(pair.sender.quota_banked(), 0);
}

fn completed_count(pair: &Pair) -> usize {
    pair.receiver_events
        .iter()
        .filter(|e| matches!(e, TransferEvent::IncomingCompleted { .. }))
        .count()
}

#[test]
fn test_more_transfers_than_the_rate_covers_still_progress() {
    // 129 minimum frames need more than one second of budget.
    let mut pair = Pair::new(default_settings());
    for _ in 0..129 {
        pair.sender.begin_outgoing(random_blob(1024), RECEIVER).unwrap();
    }

    pair.run_until(70, |p| p.total_frame_bytes() > 0);
    assert_eq!(pair.frames_per_tick.last().unwrap().len(), 129);
    assert!(pair
        .frames_per_tick
        .iter()
        .flatten()
        .all(|len| *len == FRAME_PAYLOAD));

    pair.run_until(400, |p| completed_count(p) == 129);
    assert_eq!(pair.total_frame_bytes(), 129 * 1024);
}

#[test]
fn test_low_rate_still_emits_full_frames() {
    let settings = TransferSettings {
        max_bytes_per_second: 1000,
        max_age_ticks: 2000,
        ..default_settings()
    };
    let mut pair = Pair::new(settings);
    for _ in 0..4 {
        pair.sender.begin_outgoing(random_blob(4096), RECEIVER).unwrap();
    }

    pair.run_until(70, |p| p.total_frame_bytes() > 0);
    pair.run_until(1200, |p| completed_count(p) == 4);
    assert_eq!(pair.total_frame_bytes(), 4 * 4096);
    assert!(pair
        .frames_per_tick
        .iter()
        .flatten()
        .all(|len| *len == FRAME_PAYLOAD));
}
