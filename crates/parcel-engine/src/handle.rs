//! Owner-facing handles and the registry that maps them to transfers.

use std::collections::BTreeMap;

use parcel_core::TransferId;

/// Returned by admission. The owner polls progress through it and drops the
/// transfer by removing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutgoingHandle(pub(crate) u64);

/// Exposed to the owner one tick after the first frame of a new transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IncomingHandle(pub(crate) u64);

/// Handles the owner can currently see, keyed to the transfer they track.
///
/// Only the driver mutates this, and only while committing staged effects
/// (plus admission and `take_incoming`, which act on the owner's behalf).
#[derive(Debug)]
pub(crate) struct Handles<H> {
    by_handle: BTreeMap<H, TransferId>,
}

impl<H: Copy + Ord> Handles<H> {
    pub fn new() -> Self {
        Self {
            by_handle: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, handle: H, transfer_id: TransferId) {
        self.by_handle.insert(handle, transfer_id);
    }

    pub fn remove(&mut self, handle: H) -> Option<TransferId> {
        self.by_handle.remove(&handle)
    }

    pub fn get(&self, handle: H) -> Option<TransferId> {
        self.by_handle.get(&handle).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (H, TransferId)> + '_ {
        self.by_handle.iter().map(|(h, id)| (*h, *id))
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn clear(&mut self) {
        self.by_handle.clear();
    }
}
