//! Ids of transfers whose reassembly was abandoned.
//!
//! Frames for these ids are discarded instead of reviving a dead transfer.
//! Entries are not aged; the set is a bounded FIFO and the oldest id is
//! evicted once capacity is reached.

use std::collections::{HashSet, VecDeque};

use parcel_core::TransferId;

#[derive(Debug)]
pub struct CanceledSet {
    members: HashSet<TransferId>,
    order: VecDeque<TransferId>,
    capacity: usize,
}

impl CanceledSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            members: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Remember `id`. Returns false if it was already present.
    pub fn insert(&mut self, id: TransferId) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, id: &TransferId) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
