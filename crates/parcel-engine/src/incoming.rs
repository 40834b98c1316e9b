//! Incoming transfer table — receive-side reassembly buffers.

use std::collections::HashMap;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parcel_core::{ChunkFrame, TransferId, WireError};

use crate::handle::IncomingHandle;
use crate::link::PeerId;
use crate::progress::{CompletionAge, Direction, TransferProgress};

/// One blob being reassembled from a peer's chunk frames.
#[derive(Debug)]
pub struct IncomingTransfer {
    id: TransferId,
    handle: IncomingHandle,
    source: PeerId,
    buffer: BytesMut,
    started_at: Duration,
    bytes_received: usize,
    age: CompletionAge,
}

impl IncomingTransfer {
    /// Allocate a zero-filled buffer of the announced size.
    pub(crate) fn new(
        id: TransferId,
        handle: IncomingHandle,
        source: PeerId,
        total_bytes: usize,
        started_at: Duration,
    ) -> Self {
        Self {
            id,
            handle,
            source,
            buffer: BytesMut::zeroed(total_bytes),
            started_at,
            bytes_received: 0,
            age: CompletionAge::default(),
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn handle(&self) -> IncomingHandle {
        self.handle
    }

    pub fn source(&self) -> PeerId {
        self.source
    }

    pub fn total_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_received >= self.buffer.len()
    }

    /// Copy a frame into place.
    ///
    /// The counter advances by the frame length even if the range was
    /// already written; a redelivered frame can therefore complete a
    /// transfer early. It never exceeds the total.
    pub(crate) fn apply(&mut self, frame: &ChunkFrame) -> Result<usize, WireError> {
        let written = frame.decode_into(&mut self.buffer)?;
        self.bytes_received = (self.bytes_received + written).min(self.buffer.len());
        Ok(written)
    }

    /// The reassembled bytes so far.
    pub fn payload(&self) -> &[u8] {
        &self.buffer
    }

    pub(crate) fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }

    pub(crate) fn advance_age(&mut self) -> Option<u32> {
        self.age.advance(self.is_complete())
    }

    pub fn progress(&self, now: Duration) -> TransferProgress {
        TransferProgress {
            transfer_id: self.id,
            direction: Direction::Incoming,
            peer: self.source,
            elapsed: now.saturating_sub(self.started_at),
            total_bytes: self.total_bytes(),
            transferred_bytes: self.bytes_received,
        }
    }
}

/// Every incoming transfer this engine is reassembling, keyed by TransferId.
#[derive(Debug, Default)]
pub struct IncomingTable {
    transfers: HashMap<TransferId, IncomingTransfer>,
    removed: u64,
}

impl IncomingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, transfer: IncomingTransfer) {
        self.transfers.insert(transfer.id, transfer);
    }

    pub(crate) fn remove(&mut self, id: &TransferId) -> Option<IncomingTransfer> {
        let transfer = self.transfers.remove(id)?;
        self.removed += 1;
        Some(transfer)
    }

    pub fn get(&self, id: &TransferId) -> Option<&IncomingTransfer> {
        self.transfers.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &TransferId) -> Option<&mut IncomingTransfer> {
        self.transfers.get_mut(id)
    }

    pub fn contains(&self, id: &TransferId) -> bool {
        self.transfers.contains_key(id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut IncomingTransfer> {
        self.transfers.values_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IncomingTransfer> {
        self.transfers.values()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn removed(&self) -> u64 {
        self.removed
    }

    pub(crate) fn clear(&mut self) -> usize {
        let count = self.transfers.len();
        self.removed += count as u64;
        self.transfers.clear();
        count
    }
}
