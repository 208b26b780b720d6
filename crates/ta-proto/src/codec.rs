//! Streaming codec for the trusted-application message format.
//!
//! Wire format (little-endian, packed):
//! ```text
//! [session_cmd:2][command:2][param_types:2][slot0:16][slot1:16][trailing:N]
//! ```
//! The fixed region is 38 bytes. Each slot is either a scalar pair
//! (`a:u64, b:u64`) or a memory reference (`offset:u64, size:u64`); the
//! 4-bit type code per slot lives in `param_types` (low nibble = slot 0).
//!
//! The trailing buffer is directional. A request transmits the bytes of
//! `MemRef-In` and `MemRef-InOut` slots; a reply transmits `MemRef-Out` and
//! `MemRef-InOut`. [`WireRole`] captures which side of that asymmetry the
//! caller of this module is on, so the same two functions serve both the
//! service loop and test clients.
//!
//! Decoding rewrites each memref slot's offset to its position in the
//! freshly allocated shared buffer; whatever offset the peer declared is
//! never used to index memory. Non-transmitted regions are reserved
//! zero-filled, so a reply can never leak bytes from an earlier exchange.

use std::io::{Read, Write};

use thiserror::Error;

use crate::message::{
    Direction, Message, ParamSlot, Region, FIXED_SIZE, MAX_MESSAGE_SIZE, NUM_SLOTS,
};

/// Errors produced while encoding, decoding, or accessing message contents.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying stream failure, including short reads and writes. Always
    /// fatal to the exchange.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A declared memref size would push the total message past the cap.
    /// Fatal: the message must never be partially processed.
    #[error("message too large: {declared} bytes declared, cap is {limit}")]
    MessageTooLarge { declared: usize, limit: usize },

    /// A parameter-type nibble outside the seven defined codes.
    #[error("unrecognized parameter type {nibble:#x} in slot {slot}")]
    UnknownParamType { slot: usize, nibble: u8 },

    /// A memref region does not fit inside the shared buffer.
    #[error("region out of bounds: offset {offset} + size {size} exceeds buffer of {available}")]
    RegionOutOfBounds {
        offset: usize,
        size: usize,
        available: usize,
    },

    /// A slot was accessed as a type it does not carry.
    #[error("slot {slot} does not have the expected parameter type")]
    SlotTypeMismatch { slot: usize },
}

/// Which end of the request/reply asymmetry the codec is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireRole {
    /// The client side: transmits In/InOut regions, receives Out/InOut.
    Caller,
    /// The service side: receives In/InOut regions, transmits Out/InOut.
    Responder,
}

impl WireRole {
    /// Whether a memref of direction `dir` carries trailing bytes *inbound*
    /// for this role.
    fn receives(self, dir: Direction) -> bool {
        match self {
            WireRole::Responder => matches!(dir, Direction::Input | Direction::InOut),
            WireRole::Caller => matches!(dir, Direction::Output | Direction::InOut),
        }
    }

    /// Whether a memref of direction `dir` carries trailing bytes *outbound*
    /// for this role.
    fn transmits(self, dir: Direction) -> bool {
        match self {
            WireRole::Caller => matches!(dir, Direction::Input | Direction::InOut),
            WireRole::Responder => matches!(dir, Direction::Output | Direction::InOut),
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Reads one complete message from `reader`.
///
/// Blocks until the fixed region and every expected trailing byte has
/// arrived. Memref offsets in the result point into the message's own
/// buffer; regions this role does not receive are reserved zero-filled.
///
/// # Errors
///
/// [`ProtocolError::Io`] on any stream failure or short read,
/// [`ProtocolError::MessageTooLarge`] when a declared size breaches the
/// 8192-byte cap (checked before the oversized read is attempted), and
/// [`ProtocolError::UnknownParamType`] for an undefined type nibble.
pub fn decode_message<R: Read>(reader: &mut R, role: WireRole) -> Result<Message, ProtocolError> {
    let mut fixed = [0u8; FIXED_SIZE];
    reader.read_exact(&mut fixed)?;

    let session_cmd = u16::from_le_bytes([fixed[0], fixed[1]]);
    let command = u16::from_le_bytes([fixed[2], fixed[3]]);
    let param_types = u16::from_le_bytes([fixed[4], fixed[5]]);

    let mut msg = Message::new(session_cmd, command);

    for i in 0..NUM_SLOTS {
        let nibble = ((param_types >> (4 * i)) & 0xF) as u8;
        let base = 6 + 16 * i;
        let w0 = read_u64_le(&fixed, base);
        let w1 = read_u64_le(&fixed, base + 8);

        let slot = match nibble {
            0 => ParamSlot::None,
            1 | 2 | 3 => ParamSlot::Value {
                a: w0,
                b: w1,
                dir: value_direction(nibble),
            },
            5 | 6 | 7 => {
                let dir = memref_direction(nibble);
                let size = w1 as usize;
                // Saturating: a size near usize::MAX must trip the cap
                // check, not wrap around it.
                let declared = FIXED_SIZE
                    .saturating_add(msg.buffer_len())
                    .saturating_add(size);
                if declared > MAX_MESSAGE_SIZE {
                    return Err(ProtocolError::MessageTooLarge {
                        declared,
                        limit: MAX_MESSAGE_SIZE,
                    });
                }
                // The peer's declared offset (w0) is deliberately discarded:
                // regions always occupy the next unused bytes of our buffer.
                let offset = msg.buffer_len();
                msg.buffer_mut().resize(offset + size, 0);
                if role.receives(dir) {
                    reader.read_exact(&mut msg.buffer_mut()[offset..offset + size])?;
                }
                ParamSlot::MemRef {
                    region: Region { offset, size },
                    dir,
                }
            }
            n => return Err(ProtocolError::UnknownParamType { slot: i, nibble: n }),
        };
        msg.set_slot_raw(i, slot);
    }

    Ok(msg)
}

/// Writes one complete message to `writer` and returns the number of bytes
/// emitted.
///
/// The fixed region is always written; trailing bytes follow for every
/// memref slot whose direction this role transmits. `MemRef-In` data is
/// never re-emitted by the responder.
///
/// # Errors
///
/// [`ProtocolError::Io`] on any stream failure (short writes surface as
/// `WriteZero`), [`ProtocolError::RegionOutOfBounds`] if a slot's region
/// exceeds the shared buffer.
pub fn encode_message<W: Write>(
    writer: &mut W,
    msg: &Message,
    role: WireRole,
) -> Result<usize, ProtocolError> {
    let mut fixed = [0u8; FIXED_SIZE];
    fixed[0..2].copy_from_slice(&msg.session_cmd.to_le_bytes());
    fixed[2..4].copy_from_slice(&msg.command.to_le_bytes());
    fixed[4..6].copy_from_slice(&msg.param_types().to_le_bytes());

    for i in 0..NUM_SLOTS {
        let base = 6 + 16 * i;
        let (w0, w1) = match *msg.slot(i) {
            ParamSlot::None => (0, 0),
            ParamSlot::Value { a, b, .. } => (a, b),
            ParamSlot::MemRef { region, .. } => (region.offset as u64, region.size as u64),
        };
        fixed[base..base + 8].copy_from_slice(&w0.to_le_bytes());
        fixed[base + 8..base + 16].copy_from_slice(&w1.to_le_bytes());
    }

    writer.write_all(&fixed)?;
    let mut written = FIXED_SIZE;

    for i in 0..NUM_SLOTS {
        if let ParamSlot::MemRef { dir, .. } = *msg.slot(i) {
            if role.transmits(dir) {
                let bytes = msg.region_bytes(i)?;
                writer.write_all(bytes)?;
                written += bytes.len();
            }
        }
    }

    Ok(written)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn read_u64_le(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn value_direction(nibble: u8) -> Direction {
    match nibble {
        1 => Direction::Input,
        2 => Direction::Output,
        _ => Direction::InOut,
    }
}

fn memref_direction(nibble: u8) -> Direction {
    match nibble {
        5 => Direction::Input,
        6 => Direction::Output,
        _ => Direction::InOut,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Encodes as the caller and decodes as the responder, i.e. the path a
    /// request takes into the service.
    fn request_trip(msg: &Message) -> Message {
        let mut wire = Vec::new();
        encode_message(&mut wire, msg, WireRole::Caller).expect("encode");
        decode_message(&mut Cursor::new(wire), WireRole::Responder).expect("decode")
    }

    #[test]
    fn test_value_only_message_round_trips() {
        let mut msg = Message::new(3, 0);
        msg.set_value(0, Direction::Output, 7, 9);

        assert_eq!(request_trip(&msg), msg);
    }

    #[test]
    fn test_input_memref_round_trips_with_data() {
        let mut msg = Message::new(2, 1337);
        msg.set_memref(0, Direction::Input, b"notes.txt\0").unwrap();
        msg.set_value(1, Direction::Output, 0, 0);

        let decoded = request_trip(&msg);
        assert_eq!(decoded, msg);
        assert_eq!(decoded.region_bytes(0).unwrap(), b"notes.txt\0");
    }

    #[test]
    fn test_output_memref_is_reserved_not_transmitted() {
        let mut msg = Message::new(1, 0);
        msg.set_memref_reserved(0, Direction::Output, 44).unwrap();
        msg.set_value(1, Direction::Output, 0, 0);

        let mut wire = Vec::new();
        let written = encode_message(&mut wire, &msg, WireRole::Caller).unwrap();
        // Only the fixed region goes out; the 44 bytes are a reservation.
        assert_eq!(written, FIXED_SIZE);
        assert_eq!(wire.len(), FIXED_SIZE);

        let decoded = decode_message(&mut Cursor::new(wire), WireRole::Responder).unwrap();
        assert_eq!(decoded.region_bytes(0).unwrap(), &[0u8; 44][..]);
    }

    #[test]
    fn test_responder_reply_transmits_output_regions() {
        let mut reply = Message::new(1, 0);
        reply.set_memref(0, Direction::Output, b"token-bytes").unwrap();
        reply.set_value(1, Direction::Output, 0, 0);

        let mut wire = Vec::new();
        let written = encode_message(&mut wire, &reply, WireRole::Responder).unwrap();
        assert_eq!(written, FIXED_SIZE + 11);

        let seen = decode_message(&mut Cursor::new(wire), WireRole::Caller).unwrap();
        assert_eq!(seen.region_bytes(0).unwrap(), b"token-bytes");
    }

    #[test]
    fn test_responder_does_not_echo_input_regions() {
        let mut msg = Message::new(2, 1338);
        msg.set_memref(0, Direction::Input, &[0xAA; 16]).unwrap();
        msg.set_value(1, Direction::Output, 0, 0);

        let mut wire = Vec::new();
        encode_message(&mut wire, &msg, WireRole::Responder).unwrap();
        assert_eq!(wire.len(), FIXED_SIZE);
    }

    #[test]
    fn test_inout_memref_round_trips_both_ways() {
        let mut msg = Message::new(2, 1339);
        msg.set_memref(0, Direction::InOut, &[1, 2, 3, 4]).unwrap();
        msg.set_value(1, Direction::Output, 0, 0);

        // Request direction.
        assert_eq!(request_trip(&msg), msg);

        // Reply direction.
        let mut wire = Vec::new();
        encode_message(&mut wire, &msg, WireRole::Responder).unwrap();
        let back = decode_message(&mut Cursor::new(wire), WireRole::Caller).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_declared_offset_from_peer_is_rewritten() {
        // Hand-craft a wire image whose memref slot declares a bogus offset.
        let mut fixed = vec![0u8; FIXED_SIZE];
        fixed[0..2].copy_from_slice(&2u16.to_le_bytes());
        fixed[2..4].copy_from_slice(&1338u16.to_le_bytes());
        fixed[4..6].copy_from_slice(&0x0025u16.to_le_bytes()); // memref-in, value-out
        fixed[6..14].copy_from_slice(&0xDEAD_BEEFu64.to_le_bytes()); // bogus offset
        fixed[14..22].copy_from_slice(&4u64.to_le_bytes()); // size 4
        let mut wire = fixed;
        wire.extend_from_slice(b"data");

        let msg = decode_message(&mut Cursor::new(wire), WireRole::Responder).unwrap();
        match *msg.slot(0) {
            ParamSlot::MemRef { region, .. } => {
                assert_eq!(region.offset, 0, "offset must be rewritten, not trusted");
                assert_eq!(region.size, 4);
            }
            ref other => panic!("expected memref slot, got {other:?}"),
        }
        assert_eq!(msg.region_bytes(0).unwrap(), b"data");
    }

    #[test]
    fn test_size_cap_rejected_before_reading_trailing_bytes() {
        let mut fixed = vec![0u8; FIXED_SIZE];
        fixed[0..2].copy_from_slice(&2u16.to_le_bytes());
        fixed[4..6].copy_from_slice(&0x0005u16.to_le_bytes()); // memref-in in slot 0
        fixed[14..22].copy_from_slice(&(MAX_MESSAGE_SIZE as u64).to_le_bytes());
        // No trailing bytes provided: the cap check must fire before any
        // attempt to read them.
        let err = decode_message(&mut Cursor::new(fixed), WireRole::Responder).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }

    #[test]
    fn test_declared_size_near_u64_max_is_rejected_not_wrapped() {
        // The cap sum must saturate: a size this large would otherwise wrap
        // past the check and blow up on allocation.
        let mut fixed = vec![0u8; FIXED_SIZE];
        fixed[0..2].copy_from_slice(&2u16.to_le_bytes());
        fixed[4..6].copy_from_slice(&0x0005u16.to_le_bytes()); // memref-in in slot 0
        fixed[14..22].copy_from_slice(&u64::MAX.to_le_bytes());

        let err = decode_message(&mut Cursor::new(fixed), WireRole::Responder).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }

    #[test]
    fn test_combined_slot_sizes_breaching_cap_are_rejected() {
        let half = (MAX_MESSAGE_SIZE - FIXED_SIZE) / 2 + 10;
        let mut fixed = vec![0u8; FIXED_SIZE];
        fixed[0..2].copy_from_slice(&2u16.to_le_bytes());
        fixed[4..6].copy_from_slice(&0x0066u16.to_le_bytes()); // two memref-out slots
        fixed[14..22].copy_from_slice(&(half as u64).to_le_bytes());
        fixed[30..38].copy_from_slice(&(half as u64).to_le_bytes());

        let err = decode_message(&mut Cursor::new(fixed), WireRole::Responder).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }

    #[test]
    fn test_unknown_param_nibble_is_typed_error() {
        let mut fixed = vec![0u8; FIXED_SIZE];
        fixed[4..6].copy_from_slice(&0x0004u16.to_le_bytes()); // reserved code 4

        let err = decode_message(&mut Cursor::new(fixed), WireRole::Responder).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnknownParamType { slot: 0, nibble: 4 }
        ));
    }

    #[test]
    fn test_truncated_fixed_region_is_io_error() {
        let short = vec![0u8; FIXED_SIZE - 1];
        let err = decode_message(&mut Cursor::new(short), WireRole::Responder).unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[test]
    fn test_truncated_trailing_buffer_is_io_error() {
        let mut msg = Message::new(2, 1338);
        msg.set_memref(0, Direction::Input, &[7u8; 32]).unwrap();
        let mut wire = Vec::new();
        encode_message(&mut wire, &msg, WireRole::Caller).unwrap();
        wire.truncate(wire.len() - 5);

        let err = decode_message(&mut Cursor::new(wire), WireRole::Responder).unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }
}
