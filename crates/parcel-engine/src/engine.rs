//! The per-tick transfer driver.
//!
//! One `tick` runs six phases in a fixed order:
//!
//! ```text
//! 1. admission        pending begin_outgoing requests → outgoing table
//! 2. quota            refill the global bank
//! 3. emission         split the bank, slice blobs into chunk frames
//! 4. reception        apply inbound chunk frames to reassembly buffers
//! 5. lifecycle        consistency check, unreachable peers, completion ageing
//! 6. cancellation     owner removals, then inbound cancel notices
//! ```
//!
//! Handle creation/release and owner events are staged during the tick and
//! committed after phase 6. The engine exclusively owns every table; owners
//! act only through admission, removal, and `take_incoming`.
//!
//! A transfer that never makes progress is never timed out. It persists
//! until one side cancels it.

use std::mem;
use std::time::Duration;

use bytes::Bytes;
use parcel_core::wire::{CancelIncoming, CancelOutgoing};
use parcel_core::{ChunkFrame, Message, MessageKind, TransferId, TransferSettings, WireError};

use crate::canceled::CanceledSet;
use crate::effects::{RemovalReason, StagedEffects, TransferEvent};
use crate::handle::{Handles, IncomingHandle, OutgoingHandle};
use crate::incoming::{IncomingTable, IncomingTransfer};
use crate::link::{PeerId, PeerLink};
use crate::outgoing::{OutgoingTable, OutgoingTransfer};
use crate::progress::TransferProgress;
use crate::quota::{SendQuota, Share};

/// Time as seen by one tick: the simulation clock and the step since the
/// previous tick. Every phase of a tick reads the same snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickClock {
    now: Duration,
    delta: Duration,
}

impl TickClock {
    pub fn new(now: Duration, delta: Duration) -> Self {
        Self { now, delta }
    }

    /// Clock at time zero stepping at `hz` ticks per second.
    pub fn from_hz(hz: u32) -> Self {
        Self {
            now: Duration::ZERO,
            delta: Duration::from_secs(1) / hz.max(1),
        }
    }

    /// The following tick.
    pub fn next(self) -> Self {
        Self {
            now: self.now + self.delta,
            delta: self.delta,
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn delta(&self) -> Duration {
        self.delta
    }
}

/// Rejected admission. The blob has already been dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmitError {
    #[error("blob is empty")]
    EmptyBlob,

    #[error("blob of {0} bytes exceeds the 32-bit wire length")]
    TooLarge(usize),
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub admitted: u64,
    pub rejected: u64,
    pub outgoing_completed: u64,
    pub incoming_started: u64,
    pub incoming_completed: u64,
    pub outgoing_removed: u64,
    pub incoming_removed: u64,
    pub expired: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub notices_sent: u64,
}

#[derive(Debug)]
struct PendingAdmission {
    handle: OutgoingHandle,
    transfer_id: TransferId,
    target: PeerId,
    blob: Bytes,
}

#[derive(Debug, Clone, Copy)]
enum RemovalRequest {
    Outgoing(OutgoingHandle),
    Incoming(IncomingHandle),
}

/// Cancel notices held back from reception until phase 6.
#[derive(Debug, Clone, Copy)]
enum InboundCancel {
    /// The sender abandoned what is, here, an incoming transfer.
    Outgoing { from: PeerId, transfer_id: TransferId },
    /// The receiver abandoned what is, here, an outgoing transfer.
    Incoming { from: PeerId, transfer_id: TransferId },
}

pub struct TransferEngine {
    settings: TransferSettings,
    outgoing: OutgoingTable,
    incoming: IncomingTable,
    canceled: CanceledSet,
    quota: SendQuota,
    outgoing_handles: Handles<OutgoingHandle>,
    incoming_handles: Handles<IncomingHandle>,
    next_handle: u64,
    pending: Vec<PendingAdmission>,
    removals: Vec<RemovalRequest>,
    inbox: Vec<(PeerId, Message)>,
    effects: StagedEffects,
    events: Vec<TransferEvent>,
    stats: EngineStats,
    now: Duration,
}

impl TransferEngine {
    pub fn new(settings: TransferSettings) -> Self {
        Self {
            canceled: CanceledSet::new(settings.canceled_capacity),
            quota: SendQuota::new(settings.max_bytes_per_second, settings.min_frame_quota),
            settings,
            outgoing: OutgoingTable::new(),
            incoming: IncomingTable::new(),
            outgoing_handles: Handles::new(),
            incoming_handles: Handles::new(),
            next_handle: 1,
            pending: Vec::new(),
            removals: Vec::new(),
            inbox: Vec::new(),
            effects: StagedEffects::default(),
            events: Vec::new(),
            stats: EngineStats::default(),
            now: Duration::ZERO,
        }
    }

    // ── Owner API ─────────────────────────────────────────────────────────────

    /// Queue a blob for sending to `target`. The engine takes ownership of
    /// the bytes; the transfer enters the table on the next tick.
    pub fn begin_outgoing(
        &mut self,
        blob: impl Into<Bytes>,
        target: PeerId,
    ) -> Result<OutgoingHandle, AdmitError> {
        let blob = blob.into();
        if blob.is_empty() {
            self.stats.rejected += 1;
            tracing::debug!(peer = %target, "rejected empty blob");
            return Err(AdmitError::EmptyBlob);
        }
        if u32::try_from(blob.len()).is_err() {
            self.stats.rejected += 1;
            tracing::debug!(peer = %target, bytes = blob.len(), "rejected oversized blob");
            return Err(AdmitError::TooLarge(blob.len()));
        }

        let handle = OutgoingHandle(self.allocate_handle());
        let transfer_id = TransferId::generate();
        self.outgoing_handles.insert(handle, transfer_id);
        self.pending.push(PendingAdmission {
            handle,
            transfer_id,
            target,
            blob,
        });
        Ok(handle)
    }

    /// Drop an outgoing transfer, before or after completion. Processed in
    /// the cancellation phase of the next tick. Unknown handles are ignored.
    pub fn remove_outgoing(&mut self, handle: OutgoingHandle) {
        self.removals.push(RemovalRequest::Outgoing(handle));
    }

    /// Drop an incoming transfer, before or after completion. Processed in
    /// the cancellation phase of the next tick. Unknown handles are ignored.
    pub fn remove_incoming(&mut self, handle: IncomingHandle) {
        self.removals.push(RemovalRequest::Incoming(handle));
    }

    /// Take a completed incoming blob. Releases the handle at once; there is
    /// nothing to tell the sender.
    pub fn take_incoming(&mut self, handle: IncomingHandle) -> Option<Bytes> {
        let id = self.incoming_handles.get(handle)?;
        if !self.incoming.get(&id)?.is_complete() {
            return None;
        }
        let transfer = self.incoming.remove(&id)?;
        self.incoming_handles.remove(handle);
        tracing::debug!(transfer_id = %id, bytes = transfer.total_bytes(), "incoming transfer consumed");
        Some(transfer.into_bytes())
    }

    /// Queue a message from `from` for the next tick.
    pub fn deliver(&mut self, from: PeerId, message: Message) {
        self.inbox.push((from, message));
    }

    /// Parse wire bytes and queue the message.
    pub fn deliver_bytes(
        &mut self,
        from: PeerId,
        kind: MessageKind,
        bytes: &[u8],
    ) -> Result<(), WireError> {
        let message = Message::parse(kind, bytes)?;
        self.deliver(from, message);
        Ok(())
    }

    pub fn outgoing_progress(&self, handle: OutgoingHandle) -> Option<TransferProgress> {
        let id = self.outgoing_handles.get(handle)?;
        if let Some(transfer) = self.outgoing.get(&id) {
            return Some(transfer.progress(self.now));
        }
        // Not yet admitted: nothing sent, no time elapsed.
        self.pending.iter().find(|p| p.handle == handle).map(|p| {
            OutgoingTransfer::new(p.transfer_id, p.handle, p.target, p.blob.clone(), self.now)
                .progress(self.now)
        })
    }

    pub fn incoming_progress(&self, handle: IncomingHandle) -> Option<TransferProgress> {
        let id = self.incoming_handles.get(handle)?;
        self.incoming.get(&id).map(|t| t.progress(self.now))
    }

    /// Reassembled bytes of a completed incoming transfer, without taking them.
    pub fn incoming_payload(&self, handle: IncomingHandle) -> Option<&[u8]> {
        let id = self.incoming_handles.get(handle)?;
        self.incoming
            .get(&id)
            .filter(|t| t.is_complete())
            .map(|t| t.payload())
    }

    pub fn outgoing_transfer_id(&self, handle: OutgoingHandle) -> Option<TransferId> {
        self.outgoing_handles.get(handle)
    }

    pub fn incoming_transfer_id(&self, handle: IncomingHandle) -> Option<TransferId> {
        self.incoming_handles.get(handle)
    }

    /// Events committed by the ticks since the last drain.
    pub fn drain_events(&mut self) -> Vec<TransferEvent> {
        mem::take(&mut self.events)
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = self.stats;
        stats.outgoing_removed = self.outgoing.removed();
        stats.incoming_removed = self.incoming.removed();
        stats
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub fn outgoing(&self) -> &OutgoingTable {
        &self.outgoing
    }

    pub fn incoming(&self) -> &IncomingTable {
        &self.incoming
    }

    pub fn is_canceled(&self, id: &TransferId) -> bool {
        self.canceled.contains(id)
    }

    pub fn quota_banked(&self) -> u64 {
        self.quota.banked()
    }

    /// Release every table and queued request. Owned buffers are dropped here.
    pub fn shutdown(&mut self) {
        let outgoing = self.outgoing.clear();
        let incoming = self.incoming.clear();
        let pending = self.pending.len();
        self.pending.clear();
        self.removals.clear();
        self.inbox.clear();
        self.outgoing_handles.clear();
        self.incoming_handles.clear();
        tracing::info!(outgoing, incoming, pending, "transfer engine shut down");
    }

    // ── Tick ──────────────────────────────────────────────────────────────────

    /// Run one pass.
    pub fn tick(&mut self, clock: TickClock, link: &mut impl PeerLink) {
        self.now = clock.now();

        self.admit_pending();

        let in_progress = self.outgoing.in_progress_count();
        self.quota.accrue(clock.delta(), in_progress);
        self.emit_chunks(in_progress, link);

        let mut cancels = Vec::new();
        for (from, message) in mem::take(&mut self.inbox) {
            match message {
                Message::Chunk(frame) => self.receive_chunk(from, &frame),
                Message::CancelOutgoing(m) => cancels.push(InboundCancel::Outgoing {
                    from,
                    transfer_id: m.transfer_id,
                }),
                Message::CancelIncoming(m) => cancels.push(InboundCancel::Incoming {
                    from,
                    transfer_id: m.transfer_id,
                }),
            }
        }

        self.check_handles();
        self.reap_outgoing(&*link);
        self.reap_incoming(&*link);

        self.process_removals(link);
        self.process_cancels(cancels);

        self.effects.commit(
            &mut self.outgoing_handles,
            &mut self.incoming_handles,
            &mut self.events,
        );
    }

    // ── Phase 1: admission ───────────────────────────────────────────────────

    fn admit_pending(&mut self) {
        for pending in mem::take(&mut self.pending) {
            let withdrawn = self
                .removals
                .iter()
                .any(|r| matches!(r, RemovalRequest::Outgoing(h) if *h == pending.handle));
            if withdrawn {
                self.outgoing_handles.remove(pending.handle);
                tracing::debug!(transfer_id = %pending.transfer_id, "outgoing transfer withdrawn before admission");
                continue;
            }

            tracing::info!(
                transfer_id = %pending.transfer_id,
                peer = %pending.target,
                bytes = pending.blob.len(),
                "outgoing transfer admitted"
            );
            self.outgoing.insert(OutgoingTransfer::new(
                pending.transfer_id,
                pending.handle,
                pending.target,
                pending.blob,
                self.now,
            ));
            self.stats.admitted += 1;
        }
    }

    // ── Phases 2–3: quota and emission ────────────────────────────────────────

    fn emit_chunks(&mut self, in_progress: usize, link: &mut impl PeerLink) {
        if in_progress == 0 {
            return;
        }
        let share_bytes = self.quota.share(in_progress);

        for transfer in self.outgoing.iter_mut() {
            if transfer.is_complete() || !link.is_connected(transfer.target()) {
                continue;
            }

            let mut share = Share::new(share_bytes, self.settings.min_frame_quota);
            let mut emitted = 0usize;
            while let Some(len) = share.next_frame_len(transfer.remaining()) {
                let frame = transfer.next_frame(len);
                share.spend(len);
                self.quota.debit(len);
                emitted += len;
                self.stats.frames_sent += 1;
                link.send(transfer.target(), Message::Chunk(frame));
            }
            self.stats.bytes_sent += emitted as u64;

            if emitted == 0 {
                tracing::trace!(
                    transfer_id = %transfer.id(),
                    share = share_bytes,
                    "share below minimum frame, deferring"
                );
            } else if transfer.is_complete() {
                self.stats.outgoing_completed += 1;
                tracing::info!(
                    transfer_id = %transfer.id(),
                    peer = %transfer.target(),
                    bytes = transfer.total_bytes(),
                    elapsed_ms = transfer.progress(self.now).elapsed.as_millis() as u64,
                    "outgoing transfer complete"
                );
                self.effects.notify(TransferEvent::OutgoingCompleted {
                    handle: transfer.handle(),
                });
            }
        }
    }

    // ── Phase 4: reception ────────────────────────────────────────────────────

    fn receive_chunk(&mut self, from: PeerId, frame: &ChunkFrame) {
        let id = frame.transfer_id;
        self.stats.frames_received += 1;

        if let Some(transfer) = self.incoming.get_mut(&id) {
            if transfer.source() != from {
                self.stats.frames_dropped += 1;
                tracing::warn!(transfer_id = %id, peer = %from, "chunk from unexpected peer, discarding");
                return;
            }
            if frame.total_bytes() != transfer.total_bytes() {
                self.stats.frames_dropped += 1;
                tracing::warn!(
                    transfer_id = %id,
                    announced = frame.total_bytes(),
                    expected = transfer.total_bytes(),
                    "chunk total length mismatch, discarding"
                );
                return;
            }
            let was_complete = transfer.is_complete();
            if let Err(e) = transfer.apply(frame) {
                self.stats.frames_dropped += 1;
                tracing::warn!(transfer_id = %id, error = %e, "malformed chunk, discarding");
                return;
            }
            tracing::trace!(transfer_id = %id, offset = frame.offset(), length = frame.len(), "chunk applied");
            if !was_complete && transfer.is_complete() {
                self.stats.incoming_completed += 1;
                tracing::info!(transfer_id = %id, bytes = transfer.total_bytes(), "incoming transfer complete");
                self.effects.notify(TransferEvent::IncomingCompleted {
                    handle: transfer.handle(),
                });
            }
            return;
        }

        if self.canceled.contains(&id) {
            self.stats.frames_dropped += 1;
            tracing::trace!(transfer_id = %id, "chunk for canceled transfer, discarding");
            return;
        }
        if frame.total_bytes() == 0 {
            self.stats.frames_dropped += 1;
            tracing::warn!(transfer_id = %id, peer = %from, "chunk announces empty blob, discarding");
            return;
        }
        if frame.total_bytes() > self.settings.max_incoming_bytes as usize {
            self.stats.frames_dropped += 1;
            tracing::warn!(
                transfer_id = %id,
                peer = %from,
                announced = frame.total_bytes(),
                limit = self.settings.max_incoming_bytes,
                "chunk announces oversized blob, discarding"
            );
            return;
        }

        let handle = IncomingHandle(self.allocate_handle());
        let mut transfer = IncomingTransfer::new(id, handle, from, frame.total_bytes(), self.now);
        if let Err(e) = transfer.apply(frame) {
            self.stats.frames_dropped += 1;
            tracing::warn!(transfer_id = %id, error = %e, "malformed first chunk, discarding");
            return;
        }

        tracing::info!(
            transfer_id = %id,
            peer = %from,
            bytes = transfer.total_bytes(),
            "incoming transfer started"
        );
        self.stats.incoming_started += 1;
        self.effects
            .expose_incoming(handle, id, from, transfer.total_bytes());
        if transfer.is_complete() {
            self.stats.incoming_completed += 1;
            tracing::info!(transfer_id = %id, bytes = transfer.total_bytes(), "incoming transfer complete");
            self.effects
                .notify(TransferEvent::IncomingCompleted { handle });
        }
        self.incoming.insert(transfer);
    }

    // ── Phase 5: lifecycle ────────────────────────────────────────────────────

    /// Every owner-visible handle must have a record behind it.
    fn check_handles(&mut self) {
        for (handle, id) in self.outgoing_handles.iter() {
            if !self.outgoing.contains(&id) {
                tracing::error!(transfer_id = %id, ?handle, "outgoing handle has no transfer record, releasing");
                self.effects
                    .release_outgoing(handle, RemovalReason::Inconsistent);
            }
        }
        for (handle, id) in self.incoming_handles.iter() {
            if !self.incoming.contains(&id) {
                tracing::error!(transfer_id = %id, ?handle, "incoming handle has no transfer record, releasing");
                self.effects
                    .release_incoming(handle, RemovalReason::Inconsistent);
            }
        }
    }

    fn reap_outgoing(&mut self, link: &impl PeerLink) {
        let max_age = self.settings.max_age_ticks;
        let mut doomed = Vec::new();
        for transfer in self.outgoing.iter_mut() {
            if !link.is_connected(transfer.target()) {
                doomed.push((transfer.id(), RemovalReason::PeerUnreachable));
            } else if transfer.advance_age().is_some_and(|age| age >= max_age) {
                doomed.push((transfer.id(), RemovalReason::Expired));
            }
        }

        for (id, reason) in doomed {
            let Some(transfer) = self.outgoing.remove(&id) else {
                continue;
            };
            match reason {
                RemovalReason::Expired => {
                    self.stats.expired += 1;
                    tracing::warn!(transfer_id = %id, "completed outgoing transfer never released, destroying");
                }
                _ => {
                    tracing::info!(
                        transfer_id = %id,
                        peer = %transfer.target(),
                        sent = transfer.bytes_sent(),
                        "outgoing peer unreachable, dropping transfer"
                    );
                }
            }
            self.effects.release_outgoing(transfer.handle(), reason);
        }
    }

    fn reap_incoming(&mut self, link: &impl PeerLink) {
        let max_age = self.settings.max_age_ticks;
        let mut doomed = Vec::new();
        for transfer in self.incoming.iter_mut() {
            if !link.is_connected(transfer.source()) {
                doomed.push((transfer.id(), RemovalReason::PeerUnreachable));
            } else if transfer.advance_age().is_some_and(|age| age >= max_age) {
                doomed.push((transfer.id(), RemovalReason::Expired));
            }
        }

        for (id, reason) in doomed {
            let Some(transfer) = self.incoming.remove(&id) else {
                continue;
            };
            match reason {
                RemovalReason::Expired => {
                    self.stats.expired += 1;
                    tracing::error!(
                        transfer_id = %id,
                        bytes = transfer.total_bytes(),
                        max_age_ticks = max_age,
                        "completed incoming transfer was never consumed, destroying"
                    );
                }
                _ => {
                    tracing::info!(
                        transfer_id = %id,
                        peer = %transfer.source(),
                        received = transfer.bytes_received(),
                        "incoming peer unreachable, dropping transfer"
                    );
                }
            }
            self.effects.release_incoming(transfer.handle(), reason);
        }
    }

    // ── Phase 6: cancellation ─────────────────────────────────────────────────

    fn process_removals(&mut self, link: &mut impl PeerLink) {
        for request in mem::take(&mut self.removals) {
            match request {
                RemovalRequest::Outgoing(handle) => self.remove_outgoing_now(handle, link),
                RemovalRequest::Incoming(handle) => self.remove_incoming_now(handle, link),
            }
        }
    }

    fn remove_outgoing_now(&mut self, handle: OutgoingHandle, link: &mut impl PeerLink) {
        let Some(id) = self.outgoing_handles.get(handle) else {
            return;
        };
        if let Some(transfer) = self.outgoing.remove(&id) {
            if transfer.is_complete() {
                tracing::debug!(transfer_id = %id, "completed outgoing transfer released");
            } else {
                tracing::info!(
                    transfer_id = %id,
                    sent = transfer.bytes_sent(),
                    total = transfer.total_bytes(),
                    "outgoing transfer canceled"
                );
                self.send_notice(
                    link,
                    transfer.target(),
                    Message::CancelOutgoing(CancelOutgoing { transfer_id: id }),
                );
            }
        }
        self.effects
            .release_outgoing(handle, RemovalReason::Requested);
    }

    fn remove_incoming_now(&mut self, handle: IncomingHandle, link: &mut impl PeerLink) {
        let Some(id) = self.incoming_handles.get(handle) else {
            return;
        };
        if let Some(transfer) = self.incoming.remove(&id) {
            if transfer.is_complete() {
                tracing::debug!(transfer_id = %id, "completed incoming transfer released");
            } else {
                tracing::info!(
                    transfer_id = %id,
                    received = transfer.bytes_received(),
                    total = transfer.total_bytes(),
                    "incoming transfer canceled"
                );
                self.canceled.insert(id);
                self.send_notice(
                    link,
                    transfer.source(),
                    Message::CancelIncoming(CancelIncoming { transfer_id: id }),
                );
            }
        }
        self.effects
            .release_incoming(handle, RemovalReason::Requested);
    }

    fn send_notice(&mut self, link: &mut impl PeerLink, peer: PeerId, notice: Message) {
        if !link.is_connected(peer) {
            tracing::debug!(peer = %peer, "peer unreachable, cancellation notice not sent");
            return;
        }
        self.stats.notices_sent += 1;
        link.send(peer, notice);
    }

    fn process_cancels(&mut self, cancels: Vec<InboundCancel>) {
        for cancel in cancels {
            match cancel {
                InboundCancel::Incoming { from, transfer_id } => {
                    let Some(transfer) = self.outgoing.get(&transfer_id) else {
                        tracing::debug!(transfer_id = %transfer_id, peer = %from, "cancel for unknown outgoing transfer");
                        continue;
                    };
                    if transfer.target() != from {
                        tracing::warn!(transfer_id = %transfer_id, peer = %from, "cancel from unexpected peer, ignoring");
                        continue;
                    }
                    if let Some(transfer) = self.outgoing.remove(&transfer_id) {
                        tracing::info!(
                            transfer_id = %transfer_id,
                            sent = transfer.bytes_sent(),
                            "receiver canceled outgoing transfer"
                        );
                        self.effects
                            .release_outgoing(transfer.handle(), RemovalReason::PeerCanceled);
                    }
                }
                InboundCancel::Outgoing { from, transfer_id } => {
                    match self.incoming.get(&transfer_id) {
                        Some(transfer) if transfer.source() != from => {
                            tracing::warn!(transfer_id = %transfer_id, peer = %from, "cancel from unexpected peer, ignoring");
                            continue;
                        }
                        Some(_) => {
                            if let Some(transfer) = self.incoming.remove(&transfer_id) {
                                tracing::info!(
                                    transfer_id = %transfer_id,
                                    received = transfer.bytes_received(),
                                    "sender canceled incoming transfer"
                                );
                                self.effects.release_incoming(
                                    transfer.handle(),
                                    RemovalReason::PeerCanceled,
                                );
                            }
                        }
                        None => {
                            tracing::debug!(transfer_id = %transfer_id, peer = %from, "cancel for unknown incoming transfer");
                        }
                    }
                    self.canceled.insert(transfer_id);
                }
            }
        }
    }

    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl Drop for TransferEngine {
    fn drop(&mut self) {
        if !self.outgoing.is_empty() || !self.incoming.is_empty() {
            self.shutdown();
        }
    }
}
