//! Two engines joined back to back, sending random blobs in rounds.
//!
//! The sender admits `concurrent_transfers` blobs per round. The receiver
//! takes each completed blob and checks it byte for byte against what was
//! sent. A round ends once neither side holds any transfer.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use rand::RngCore;
use tokio::sync::mpsc;

use parcel_core::config::SimulationSettings;
use parcel_core::{TransferId, TransferSettings};
use parcel_engine::{
    IncomingHandle, OutgoingHandle, RemovalReason, TickClock, TransferEngine, TransferEvent,
};

use crate::loopback::{drain_into, Datagram, LoopbackLink};

const SENDER: parcel_engine::PeerId = parcel_engine::PeerId(1);
const RECEIVER: parcel_engine::PeerId = parcel_engine::PeerId(2);

/// Outcome of one finished round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub round: u64,
    pub verified: u32,
    pub corrupt: u32,
    pub canceled: u32,
    pub bytes: u64,
    pub ticks: u64,
    pub elapsed: Duration,
}

impl RoundReport {
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes as f64 / secs
    }
}

pub struct Simulation {
    settings: SimulationSettings,
    sender: TransferEngine,
    receiver: TransferEngine,
    sender_link: LoopbackLink,
    receiver_link: LoopbackLink,
    to_receiver: mpsc::UnboundedReceiver<Datagram>,
    to_sender: mpsc::UnboundedReceiver<Datagram>,
    clock: TickClock,
    /// Blobs in flight, kept for verification.
    sent: HashMap<TransferId, Bytes>,
    outgoing: HashMap<OutgoingHandle, TransferId>,
    incoming_started: HashMap<IncomingHandle, u64>,
    ticks: u64,
    rounds: u64,
    round: RoundReport,
    round_started_at: Duration,
}

impl Simulation {
    pub fn new(transfer: TransferSettings, settings: SimulationSettings) -> Self {
        let (sender_tx, to_receiver) = mpsc::unbounded_channel();
        let (receiver_tx, to_sender) = mpsc::unbounded_channel();
        Self {
            clock: TickClock::from_hz(settings.tick_hz),
            settings,
            sender: TransferEngine::new(transfer.clone()),
            receiver: TransferEngine::new(transfer),
            sender_link: LoopbackLink::new(RECEIVER, sender_tx),
            receiver_link: LoopbackLink::new(SENDER, receiver_tx),
            to_receiver,
            to_sender,
            sent: HashMap::new(),
            outgoing: HashMap::new(),
            incoming_started: HashMap::new(),
            ticks: 0,
            rounds: 0,
            round: RoundReport::default(),
            round_started_at: Duration::ZERO,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.clock.delta()
    }

    /// Advance both engines by one tick. Returns a report when this tick
    /// finished a round.
    pub fn step(&mut self) -> Option<RoundReport> {
        if self.outgoing.is_empty() && self.sent.is_empty() {
            self.start_round();
        }

        self.sender.tick(self.clock, &mut self.sender_link);
        drain_into(&mut self.to_receiver, &mut self.receiver, SENDER);
        self.receiver.tick(self.clock, &mut self.receiver_link);
        drain_into(&mut self.to_sender, &mut self.sender, RECEIVER);

        self.handle_sender_events();
        self.handle_receiver_events();
        self.cancel_stale_incoming();

        self.ticks += 1;
        self.clock = self.clock.next();

        if self.outgoing.is_empty() && self.sent.is_empty() {
            let mut report = std::mem::take(&mut self.round);
            report.ticks = self.ticks;
            report.elapsed = self.clock.now().saturating_sub(self.round_started_at);
            return Some(report);
        }
        None
    }

    fn start_round(&mut self) {
        self.rounds += 1;
        self.round = RoundReport {
            round: self.rounds,
            ..RoundReport::default()
        };
        self.ticks = 0;
        self.round_started_at = self.clock.now();

        let mut rng = rand::thread_rng();
        for _ in 0..self.settings.concurrent_transfers.max(1) {
            let mut blob = vec![0u8; self.settings.blob_bytes.max(1) as usize];
            rng.fill_bytes(&mut blob);
            let blob = Bytes::from(blob);
            match self.sender.begin_outgoing(blob.clone(), RECEIVER) {
                Ok(handle) => {
                    if let Some(id) = self.sender.outgoing_transfer_id(handle) {
                        self.outgoing.insert(handle, id);
                        self.sent.insert(id, blob);
                    }
                }
                Err(e) => tracing::error!(error = %e, "blob rejected"),
            }
        }
        tracing::debug!(
            round = self.round.round,
            transfers = self.outgoing.len(),
            "round started"
        );
    }

    fn handle_sender_events(&mut self) {
        for event in self.sender.drain_events() {
            match event {
                TransferEvent::OutgoingCompleted { handle } => {
                    self.sender.remove_outgoing(handle);
                    self.outgoing.remove(&handle);
                }
                TransferEvent::OutgoingRemoved { handle, reason } => {
                    if let Some(id) = self.outgoing.remove(&handle) {
                        if reason == RemovalReason::PeerCanceled && self.sent.remove(&id).is_some() {
                            self.round.canceled += 1;
                        }
                        tracing::debug!(transfer_id = %id, ?reason, "outgoing transfer removed");
                    }
                }
                _ => {}
            }
        }
    }

    fn handle_receiver_events(&mut self) {
        for event in self.receiver.drain_events() {
            match event {
                TransferEvent::IncomingStarted { handle, .. } => {
                    self.incoming_started.insert(handle, self.ticks);
                }
                TransferEvent::IncomingCompleted { handle } => self.verify(handle),
                TransferEvent::IncomingRemoved { handle, reason } => {
                    self.incoming_started.remove(&handle);
                    tracing::debug!(?handle, ?reason, "incoming transfer removed");
                }
                _ => {}
            }
        }
    }

    fn verify(&mut self, handle: IncomingHandle) {
        self.incoming_started.remove(&handle);
        let Some(id) = self.receiver.incoming_transfer_id(handle) else {
            return;
        };
        let Some(received) = self.receiver.take_incoming(handle) else {
            return;
        };
        match self.sent.remove(&id) {
            Some(original) if original == received => {
                self.round.verified += 1;
                self.round.bytes += received.len() as u64;
                tracing::debug!(transfer_id = %id, bytes = received.len(), "blob verified");
            }
            Some(_) => {
                self.round.corrupt += 1;
                tracing::error!(transfer_id = %id, "received blob differs from the one sent");
            }
            None => tracing::warn!(transfer_id = %id, "received a blob nobody sent"),
        }
    }

    fn cancel_stale_incoming(&mut self) {
        let limit = u64::from(self.settings.cancel_after_ticks);
        if limit == 0 {
            return;
        }
        let stale: Vec<_> = self
            .incoming_started
            .iter()
            .filter(|(_, started)| self.ticks.saturating_sub(**started) >= limit)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in stale {
            self.incoming_started.remove(&handle);
            tracing::info!(?handle, after_ticks = limit, "receiver abandoning transfer");
            self.receiver.remove_incoming(handle);
        }
    }

    /// Drop everything still in flight on both sides.
    pub fn shutdown(&mut self) {
        self.sender.shutdown();
        self.receiver.shutdown();
        self.sent.clear();
        self.outgoing.clear();
        self.incoming_started.clear();
    }
}
