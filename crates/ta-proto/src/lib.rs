//! # ta-proto
//!
//! Wire protocol for the treasure-ta trusted-application service: the typed
//! message model and the streaming binary codec.
//!
//! The protocol is a fixed-format request/response exchange. Every message
//! is a 38-byte little-endian fixed region (session command, command id,
//! parameter-type bitmap, two 16-byte parameter slots) followed by a shared
//! trailing buffer carrying the bytes of memory-reference slots. The codec
//! is directional (requests and replies transmit different memref
//! directions), which [`WireRole`] makes explicit so both the service and
//! test clients use the same functions.
//!
//! This crate has no dependencies on the filesystem, the session store, or
//! the process environment; it is pure framing.

pub mod codec;
pub mod message;

pub use codec::{decode_message, encode_message, ProtocolError, WireRole};
pub use message::{
    CommandId, Direction, Message, ParamSlot, Region, SessionCommand, FIXED_SIZE,
    MAX_MESSAGE_SIZE, NUM_SLOTS,
};
