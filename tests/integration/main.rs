//! Parcel integration test harness.
//!
//! Two engines wired back to back in-process. Every message crosses the
//! link as wire bytes and is parsed again on the far side, so these tests
//! exercise the codec as well as the engine.
//!
//!   cargo test --test integration

use std::collections::HashSet;

use parcel_core::{Message, TransferSettings};
use parcel_engine::{PeerId, PeerLink, TickClock, TransferEngine, TransferEvent};

mod cancel;
mod lifecycle;
mod quota;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SENDER: PeerId = PeerId(1);
pub const RECEIVER: PeerId = PeerId(2);

/// Collects what one engine sends during a tick.
#[derive(Default)]
pub struct Wire {
    pub sent: Vec<(PeerId, Message)>,
    pub down: HashSet<PeerId>,
}

impl PeerLink for Wire {
    fn is_connected(&self, peer: PeerId) -> bool {
        !self.down.contains(&peer)
    }

    fn send(&mut self, peer: PeerId, message: Message) {
        self.sent.push((peer, message));
    }
}

/// A sending and a receiving engine stepped in lockstep.
pub struct Pair {
    pub sender: TransferEngine,
    pub receiver: TransferEngine,
    pub sender_wire: Wire,
    pub receiver_wire: Wire,
    pub clock: TickClock,
    pub ticks: u64,
    /// Chunk lengths the sender emitted, one entry per tick.
    pub frames_per_tick: Vec<Vec<usize>>,
    pub sender_events: Vec<TransferEvent>,
    pub receiver_events: Vec<TransferEvent>,
}

impl Pair {
    pub fn new(settings: TransferSettings) -> Self {
        Self {
            sender: TransferEngine::new(settings.clone()),
            receiver: TransferEngine::new(settings),
            sender_wire: Wire::default(),
            receiver_wire: Wire::default(),
            clock: TickClock::from_hz(60),
            ticks: 0,
            frames_per_tick: Vec::new(),
            sender_events: Vec::new(),
            receiver_events: Vec::new(),
        }
    }

    /// One tick on each side. Messages the sender emits reach the receiver
    /// within the same step; replies reach the sender on the next one.
    pub fn step(&mut self) {
        self.sender.tick(self.clock, &mut self.sender_wire);
        let mut lengths = Vec::new();
        for (_, message) in self.sender_wire.sent.drain(..) {
            if let Message::Chunk(frame) = &message {
                lengths.push(frame.len());
            }
            self.receiver
                .deliver_bytes(SENDER, message.kind(), &message.to_bytes())
                .expect("sender emitted a malformed message");
        }
        self.frames_per_tick.push(lengths);

        self.receiver.tick(self.clock, &mut self.receiver_wire);
        for (_, message) in self.receiver_wire.sent.drain(..) {
            self.sender
                .deliver_bytes(RECEIVER, message.kind(), &message.to_bytes())
                .expect("receiver emitted a malformed message");
        }

        self.sender_events.extend(self.sender.drain_events());
        self.receiver_events.extend(self.receiver.drain_events());
        self.clock = self.clock.next();
        self.ticks += 1;
    }

    /// Step until `done` holds. Returns the number of steps taken.
    pub fn run_until(&mut self, max_ticks: u64, mut done: impl FnMut(&Pair) -> bool) -> u64 {
        let start = self.ticks;
        while !done(self) {
            assert!(
                self.ticks - start < max_ticks,
                "condition not reached within {max_ticks} ticks"
            );
            self.step();
        }
        self.ticks - start
    }

    pub fn receiver_completed(&self) -> Option<parcel_engine::IncomingHandle> {
        self.receiver_events.iter().find_map(|e| match e {
            TransferEvent::IncomingCompleted { handle } => Some(*handle),
            _ => None,
        })
    }

    pub fn receiver_started(&self) -> Option<parcel_engine::IncomingHandle> {
        self.receiver_events.iter().find_map(|e| match e {
            TransferEvent::IncomingStarted { handle, .. } => Some(*handle),
            _ => None,
        })
    }

    pub fn total_frame_bytes(&self) -> usize {
        self.frames_per_tick.iter().flatten().sum()
    }
}

pub fn random_blob(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut blob = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut blob);
    blob
}

pub fn default_settings() -> TransferSettings {
    TransferSettings::default()
}
