//! Parcel wire format — on-wire types exchanged between two peers.
//!
//! These types ARE the protocol. Every field and every size is part of the
//! wire format and must match exactly on both peers; there is no negotiation.
//!
//! All types are #[repr(C)] over byte-aligned fields (integers use zerocopy's
//! little-endian wrappers) so the layout has no padding, and use zerocopy
//! derives for allocation-free serialization. There is no unsafe code in
//! this module.

use std::fmt;

use rand::RngCore;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Payload capacity of one chunk frame, in bytes.
/// Protocol constant: both peers must agree on it exactly.
pub const FRAME_PAYLOAD: usize = 256;

/// Wire size of a chunk frame: 16 id + 3 × 4 header + payload.
pub const CHUNK_FRAME_SIZE: usize = 16 + 12 + FRAME_PAYLOAD;

/// Wire size of either cancel message.
pub const CANCEL_SIZE: usize = 16;

// ── Transfer Identifier ───────────────────────────────────────────────────────

/// 128-bit random identifier of one transfer, end to end.
///
/// The only key that correlates a sender's outgoing record with the
/// receiver's incoming record. Never reused, never mutated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, AsBytes, FromBytes, FromZeroes)]
#[repr(transparent)]
pub struct TransferId([u8; 16]);

assert_eq_size!(TransferId, [u8; 16]);

impl TransferId {
    /// Draw a fresh identifier from the thread-local RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; 16] {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferId({})", self)
    }
}

// ── Chunk Frame ───────────────────────────────────────────────────────────────

/// One bounded byte range of a transfer's blob.
///
/// Only the first `length` bytes of `payload` are meaningful; the rest is
/// zero. Frames carry their own offset, so applying them is order-independent.
///
/// Wire size: 284 bytes.
#[derive(Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct ChunkFrame {
    pub transfer_id: TransferId,

    /// Length of the whole blob. Lets the receiver size its buffer from
    /// whichever frame happens to arrive first.
    pub total_bytes: U32<LittleEndian>,

    /// Byte offset of this fragment within the blob.
    pub offset: U32<LittleEndian>,

    /// Number of meaningful payload bytes. At most FRAME_PAYLOAD.
    pub length: U32<LittleEndian>,

    pub payload: [u8; FRAME_PAYLOAD],
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(ChunkFrame, [u8; CHUNK_FRAME_SIZE]);

impl ChunkFrame {
    /// Copy up to `max_len` bytes of `source`, starting at `offset`, into a
    /// new frame. The emitted length is `min(source.len() - offset, max_len,
    /// FRAME_PAYLOAD)` and may be zero when `offset` is past the end.
    pub fn encode(transfer_id: TransferId, source: &[u8], offset: usize, max_len: usize) -> Self {
        let mut frame = Self::new_zeroed();
        let len = source
            .len()
            .saturating_sub(offset)
            .min(max_len)
            .min(FRAME_PAYLOAD);
        if len > 0 {
            frame.payload[..len].copy_from_slice(&source[offset..offset + len]);
        }
        frame.transfer_id = transfer_id;
        frame.total_bytes = U32::new(source.len() as u32);
        frame.offset = U32::new(offset as u32);
        frame.length = U32::new(len as u32);
        frame
    }

    /// Copy this frame's bytes into `dest` at the frame's offset.
    /// Returns the number of bytes written.
    pub fn decode_into(&self, dest: &mut [u8]) -> Result<usize, WireError> {
        let len = self.len();
        if len > FRAME_PAYLOAD {
            return Err(WireError::PayloadTooLarge(len));
        }
        let offset = self.offset.get() as usize;
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= dest.len())
            .ok_or(WireError::FrameOutOfBounds {
                offset,
                length: len,
                capacity: dest.len(),
            })?;
        dest[offset..end].copy_from_slice(&self.payload[..len]);
        Ok(len)
    }

    pub fn len(&self) -> usize {
        self.length.get() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length.get() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes.get() as usize
    }

    pub fn offset(&self) -> usize {
        self.offset.get() as usize
    }
}

impl fmt::Debug for ChunkFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkFrame")
            .field("transfer_id", &self.transfer_id)
            .field("total_bytes", &self.total_bytes.get())
            .field("offset", &self.offset.get())
            .field("length", &self.length.get())
            .finish_non_exhaustive()
    }
}

// ── Cancellation ──────────────────────────────────────────────────────────────

/// Sent by the sender after it abandoned an unfinished outgoing transfer.
/// The receiver drops its partial reassembly and remembers the id.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct CancelOutgoing {
    pub transfer_id: TransferId,
}

assert_eq_size!(CancelOutgoing, [u8; CANCEL_SIZE]);

/// Sent by the receiver after it abandoned an unfinished incoming transfer.
/// The sender stops emitting and drops its outgoing record.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct CancelIncoming {
    pub transfer_id: TransferId,
}

assert_eq_size!(CancelIncoming, [u8; CANCEL_SIZE]);

// ── Message ───────────────────────────────────────────────────────────────────

/// Channel discriminator. The transport carries it alongside the bytes
/// (one RPC channel per kind), it is not part of any frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Chunk = 0x01,
    CancelOutgoing = 0x02,
    CancelIncoming = 0x03,
}

impl TryFrom<u8> for MessageKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageKind::Chunk),
            0x02 => Ok(MessageKind::CancelOutgoing),
            0x03 => Ok(MessageKind::CancelIncoming),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> u8 {
        kind as u8
    }
}

/// Any message one engine sends to another.
#[derive(Debug, Clone)]
pub enum Message {
    Chunk(ChunkFrame),
    CancelOutgoing(CancelOutgoing),
    CancelIncoming(CancelIncoming),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Chunk(_) => MessageKind::Chunk,
            Message::CancelOutgoing(_) => MessageKind::CancelOutgoing,
            Message::CancelIncoming(_) => MessageKind::CancelIncoming,
        }
    }

    pub fn transfer_id(&self) -> TransferId {
        match self {
            Message::Chunk(frame) => frame.transfer_id,
            Message::CancelOutgoing(m) => m.transfer_id,
            Message::CancelIncoming(m) => m.transfer_id,
        }
    }

    /// Wire bytes of the message body.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Chunk(frame) => frame.as_bytes(),
            Message::CancelOutgoing(m) => m.as_bytes(),
            Message::CancelIncoming(m) => m.as_bytes(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Interpret `bytes` as a message of the given kind.
    /// The length must match the kind's wire size exactly.
    pub fn parse(kind: MessageKind, bytes: &[u8]) -> Result<Self, WireError> {
        let expected = match kind {
            MessageKind::Chunk => CHUNK_FRAME_SIZE,
            MessageKind::CancelOutgoing | MessageKind::CancelIncoming => CANCEL_SIZE,
        };
        if bytes.len() != expected {
            return Err(WireError::BadLength {
                kind,
                expected,
                got: bytes.len(),
            });
        }
        let message = match kind {
            MessageKind::Chunk => ChunkFrame::read_from(bytes).map(Message::Chunk),
            MessageKind::CancelOutgoing => {
                CancelOutgoing::read_from(bytes).map(Message::CancelOutgoing)
            }
            MessageKind::CancelIncoming => {
                CancelIncoming::read_from(bytes).map(Message::CancelIncoming)
            }
        };
        message.ok_or(WireError::BadLength {
            kind,
            expected,
            got: bytes.len(),
        })
    }
}

impl From<ChunkFrame> for Message {
    fn from(frame: ChunkFrame) -> Self {
        Message::Chunk(frame)
    }
}

impl From<CancelOutgoing> for Message {
    fn from(m: CancelOutgoing) -> Self {
        Message::CancelOutgoing(m)
    }
}

impl From<CancelIncoming> for Message {
    fn from(m: CancelIncoming) -> Self {
        Message::CancelIncoming(m)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown message kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("{kind:?} message must be {expected} bytes, got {got}")]
    BadLength {
        kind: MessageKind,
        expected: usize,
        got: usize,
    },

    #[error("frame length {0} exceeds payload capacity {}", FRAME_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("frame range {offset}+{length} exceeds buffer of {capacity} bytes")]
    FrameOutOfBounds {
        offset: usize,
        length: usize,
        capacity: usize,
    },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
