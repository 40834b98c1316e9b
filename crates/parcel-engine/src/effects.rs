//! Structural changes collected during a tick and
//! committed in one pass at its end.
//!
//! Nothing staged here is visible to the owner until the tick that staged
//! it has finished.

use parcel_core::TransferId;

use crate::handle::{Handles, IncomingHandle, OutgoingHandle};
use crate::link::PeerId;

/// Why a transfer left its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The owner removed the handle.
    Requested,
    /// The far side sent a cancellation notice.
    PeerCanceled,
    /// The counterpart peer no longer resolves.
    PeerUnreachable,
    /// Completed but not consumed within the retention window.
    Expired,
    /// The handle outlived its internal record.
    Inconsistent,
}

/// What the owner learns after each tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    IncomingStarted {
        handle: IncomingHandle,
        transfer_id: TransferId,
        source: PeerId,
        total_bytes: usize,
    },
    OutgoingCompleted {
        handle: OutgoingHandle,
    },
    IncomingCompleted {
        handle: IncomingHandle,
    },
    /// Not emitted for owner-initiated removals.
    OutgoingRemoved {
        handle: OutgoingHandle,
        reason: RemovalReason,
    },
    /// Not emitted for owner-initiated removals.
    IncomingRemoved {
        handle: IncomingHandle,
        reason: RemovalReason,
    },
}

#[derive(Debug)]
enum Effect {
    ExposeIncoming {
        handle: IncomingHandle,
        transfer_id: TransferId,
        source: PeerId,
        total_bytes: usize,
    },
    ReleaseOutgoing {
        handle: OutgoingHandle,
        reason: RemovalReason,
    },
    ReleaseIncoming {
        handle: IncomingHandle,
        reason: RemovalReason,
    },
    Notify(TransferEvent),
}

#[derive(Debug, Default)]
pub(crate) struct StagedEffects {
    effects: Vec<Effect>,
}

impl StagedEffects {
    pub fn expose_incoming(
        &mut self,
        handle: IncomingHandle,
        transfer_id: TransferId,
        source: PeerId,
        total_bytes: usize,
    ) {
        self.effects.push(Effect::ExposeIncoming {
            handle,
            transfer_id,
            source,
            total_bytes,
        });
    }

    pub fn release_outgoing(&mut self, handle: OutgoingHandle, reason: RemovalReason) {
        self.effects.push(Effect::ReleaseOutgoing { handle, reason });
    }

    pub fn release_incoming(&mut self, handle: IncomingHandle, reason: RemovalReason) {
        self.effects.push(Effect::ReleaseIncoming { handle, reason });
    }

    pub fn notify(&mut self, event: TransferEvent) {
        self.effects.push(Effect::Notify(event));
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Apply everything in staging order.
    pub fn commit(
        &mut self,
        outgoing: &mut Handles<OutgoingHandle>,
        incoming: &mut Handles<IncomingHandle>,
        events: &mut Vec<TransferEvent>,
    ) {
        for effect in self.effects.drain(..) {
            match effect {
                Effect::ExposeIncoming {
                    handle,
                    transfer_id,
                    source,
                    total_bytes,
                } => {
                    incoming.insert(handle, transfer_id);
                    events.push(TransferEvent::IncomingStarted {
                        handle,
                        transfer_id,
                        source,
                        total_bytes,
                    });
                }
                Effect::ReleaseOutgoing { handle, reason } => {
                    if outgoing.remove(handle).is_some() && !owner_initiated(reason) {
                        events.push(TransferEvent::OutgoingRemoved { handle, reason });
                    }
                }
                Effect::ReleaseIncoming { handle, reason } => {
                    if incoming.remove(handle).is_some() && !owner_initiated(reason) {
                        events.push(TransferEvent::IncomingRemoved { handle, reason });
                    }
                }
                Effect::Notify(event) => events.push(event),
            }
        }
    }
}

fn owner_initiated(reason: RemovalReason) -> bool {
    reason == RemovalReason::Requested
}
