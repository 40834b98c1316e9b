//! parcel-engine — chunked blob transfer between peers.
//! Tables, send quota, and the tick-driven engine that owns them.

pub mod canceled;
pub mod effects;
pub mod engine;
mod handle;
pub mod incoming;
pub mod link;
pub mod outgoing;
pub mod progress;
pub mod quota;

pub use effects::{RemovalReason, TransferEvent};
pub use engine::{AdmitError, EngineStats, TickClock, TransferEngine};
pub use handle::{IncomingHandle, OutgoingHandle};
pub use incoming::{IncomingTable, IncomingTransfer};
pub use link::{PeerId, PeerLink};
pub use outgoing::{OutgoingTable, OutgoingTransfer};
pub use progress::{Direction, TransferProgress};
