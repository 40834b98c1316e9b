//! The transport seam the engine sends through.

use std::fmt;

use parcel_core::Message;

/// Opaque reference to a remote peer, assigned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// What the engine needs from the transport.
///
/// Delivery is assumed reliable and in order per message kind; the engine
/// never waits on a send and never learns whether it arrived.
pub trait PeerLink {
    /// Whether `peer` still resolves to a live connection.
    fn is_connected(&self, peer: PeerId) -> bool;

    /// Fire-and-forget send.
    fn send(&mut self, peer: PeerId, message: Message);
}
