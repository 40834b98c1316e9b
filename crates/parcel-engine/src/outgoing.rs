//! Outgoing transfer table — send-side state and the blob it owns.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use parcel_core::{ChunkFrame, TransferId};

use crate::handle::OutgoingHandle;
use crate::link::PeerId;
use crate::progress::{CompletionAge, Direction, TransferProgress};

/// One blob being streamed to a peer.
///
/// Owns its buffer from admission until the record leaves the table. The
/// buffer is only ever read.
#[derive(Debug)]
pub struct OutgoingTransfer {
    id: TransferId,
    handle: OutgoingHandle,
    target: PeerId,
    buffer: Bytes,
    started_at: Duration,
    bytes_sent: usize,
    age: CompletionAge,
}

impl OutgoingTransfer {
    pub(crate) fn new(
        id: TransferId,
        handle: OutgoingHandle,
        target: PeerId,
        buffer: Bytes,
        started_at: Duration,
    ) -> Self {
        Self {
            id,
            handle,
            target,
            buffer,
            started_at,
            bytes_sent: 0,
            age: CompletionAge::default(),
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn handle(&self) -> OutgoingHandle {
        self.handle
    }

    pub fn target(&self) -> PeerId {
        self.target
    }

    pub fn total_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.bytes_sent
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_sent == self.buffer.len()
    }

    /// Slice the next `max_len` unsent bytes into a frame and mark them sent.
    pub(crate) fn next_frame(&mut self, max_len: usize) -> ChunkFrame {
        let frame = ChunkFrame::encode(self.id, &self.buffer, self.bytes_sent, max_len);
        self.bytes_sent += frame.len();
        debug_assert!(self.bytes_sent <= self.buffer.len());
        frame
    }

    pub(crate) fn advance_age(&mut self) -> Option<u32> {
        self.age.advance(self.is_complete())
    }

    pub fn progress(&self, now: Duration) -> TransferProgress {
        TransferProgress {
            transfer_id: self.id,
            direction: Direction::Outgoing,
            peer: self.target,
            elapsed: now.saturating_sub(self.started_at),
            total_bytes: self.total_bytes(),
            transferred_bytes: self.bytes_sent,
        }
    }
}

/// Every outgoing transfer this engine owns, keyed by TransferId.
#[derive(Debug, Default)]
pub struct OutgoingTable {
    transfers: HashMap<TransferId, OutgoingTransfer>,
    removed: u64,
}

impl OutgoingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, transfer: OutgoingTransfer) {
        self.transfers.insert(transfer.id, transfer);
    }

    /// Take a transfer out of the table. Its buffer is released when the
    /// returned record is dropped.
    pub(crate) fn remove(&mut self, id: &TransferId) -> Option<OutgoingTransfer> {
        let transfer = self.transfers.remove(id)?;
        self.removed += 1;
        Some(transfer)
    }

    pub fn get(&self, id: &TransferId) -> Option<&OutgoingTransfer> {
        self.transfers.get(id)
    }

    pub fn contains(&self, id: &TransferId) -> bool {
        self.transfers.contains_key(id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut OutgoingTransfer> {
        self.transfers.values_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutgoingTransfer> {
        self.transfers.values()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Transfers that still have bytes to send.
    pub fn in_progress_count(&self) -> usize {
        self.transfers.values().filter(|t| !t.is_complete()).count()
    }

    /// How many records have left the table over its lifetime.
    pub fn removed(&self) -> u64 {
        self.removed
    }

    /// Drop every record. Returns how many were released.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.transfers.len();
        self.removed += count as u64;
        self.transfers.clear();
        count
    }
}
