//! parcel-core — wire format, transfer identifiers, and configuration.
//! All other Parcel crates depend on this one.

pub mod config;
pub mod wire;

pub use config::{ParcelConfig, TransferSettings};
pub use wire::{ChunkFrame, Message, MessageKind, TransferId, WireError, FRAME_PAYLOAD};
