//! In-process link between two engines.
//!
//! Every message crosses as wire bytes plus its kind, the way a real
//! transport would carry it, and is parsed again on the far side.

use bytes::Bytes;
use tokio::sync::mpsc;

use parcel_core::{Message, MessageKind};
use parcel_engine::{PeerId, PeerLink, TransferEngine};

/// One message in flight.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub kind: MessageKind,
    pub body: Bytes,
}

/// Sending half, owned by one engine's host.
pub struct LoopbackLink {
    remote: PeerId,
    tx: mpsc::UnboundedSender<Datagram>,
}

impl LoopbackLink {
    pub fn new(remote: PeerId, tx: mpsc::UnboundedSender<Datagram>) -> Self {
        Self { remote, tx }
    }
}

impl PeerLink for LoopbackLink {
    fn is_connected(&self, peer: PeerId) -> bool {
        peer == self.remote && !self.tx.is_closed()
    }

    fn send(&mut self, peer: PeerId, message: Message) {
        if peer != self.remote {
            tracing::warn!(%peer, "no route to peer, dropping message");
            return;
        }
        let datagram = Datagram {
            kind: message.kind(),
            body: Bytes::from(message.to_bytes()),
        };
        if self.tx.send(datagram).is_err() {
            tracing::debug!(%peer, "loopback closed, dropping message");
        }
    }
}

/// Hand everything waiting on `rx` to `engine` as if it came from `from`.
/// Returns the number of datagrams delivered.
pub fn drain_into(
    rx: &mut mpsc::UnboundedReceiver<Datagram>,
    engine: &mut TransferEngine,
    from: PeerId,
) -> usize {
    let mut delivered = 0;
    while let Ok(datagram) = rx.try_recv() {
        match engine.deliver_bytes(from, datagram.kind, &datagram.body) {
            Ok(()) => delivered += 1,
            Err(e) => tracing::warn!(error = %e, peer = %from, "malformed datagram, dropping"),
        }
    }
    delivered
}
