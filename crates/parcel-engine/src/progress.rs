//! Read-only progress view and completion ageing.

use std::time::Duration;

use parcel_core::TransferId;

use crate::link::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Snapshot of one transfer, as of the most recent tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub transfer_id: TransferId,
    pub direction: Direction,
    /// Target for outgoing transfers, source for incoming ones.
    pub peer: PeerId,
    pub elapsed: Duration,
    pub total_bytes: usize,
    /// Bytes sent or received so far.
    pub transferred_bytes: usize,
}

impl TransferProgress {
    pub fn is_complete(&self) -> bool {
        self.transferred_bytes >= self.total_bytes
    }

    pub fn is_in_progress(&self) -> bool {
        !self.is_complete()
    }

    /// Fraction done, clamped to [0, 1].
    pub fn ratio(&self) -> f32 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        (self.transferred_bytes as f64 / self.total_bytes as f64).clamp(0.0, 1.0) as f32
    }
}

/// Ticks elapsed since a transfer reached 100%.
///
/// The lifecycle pass that first sees the transfer complete starts the
/// count at zero; every later pass adds one. A transfer therefore never
/// ages on the tick it completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CompletionAge(Option<u32>);

impl CompletionAge {
    /// Advance one lifecycle pass. Returns the age, or None while incomplete.
    pub fn advance(&mut self, complete: bool) -> Option<u32> {
        self.0 = match self.0 {
            Some(age) => Some(age.saturating_add(1)),
            None if complete => Some(0),
            None => None,
        };
        self.0
    }
}
