//! Typed message model for the trusted-application protocol.
//!
//! A message is a 38-byte fixed region (session command, command id, a
//! 4-bit-per-slot parameter-type bitmap, and two 16-byte parameter slots)
//! followed by a variable-length shared buffer that holds the data of any
//! memory-reference slots. The union layout of the original wire struct is
//! modelled as the [`ParamSlot`] sum type; the raw offset/length arithmetic
//! of the original is replaced by [`Region`] views that are bounds-checked
//! against the owned buffer every time a slice is taken.

use crate::codec::ProtocolError;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Number of parameter slots in every message.
pub const NUM_SLOTS: usize = 2;

/// Size of the fixed region on the wire: three u16 header fields plus two
/// 16-byte slots, packed, little-endian.
pub const FIXED_SIZE: usize = 6 + NUM_SLOTS * 16;

/// Hard cap on the total serialized message size (fixed region + shared
/// buffer). A message whose memref sizes would push past this is rejected
/// before any oversized read happens.
pub const MAX_MESSAGE_SIZE: usize = 0x2000;

/// Session-level commands carried in the first header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SessionCommand {
    Open = 1,
    Invoke = 2,
    Close = 3,
}

impl TryFrom<u16> for SessionCommand {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, ()> {
        match value {
            1 => Ok(SessionCommand::Open),
            2 => Ok(SessionCommand::Invoke),
            3 => Ok(SessionCommand::Close),
            _ => Err(()),
        }
    }
}

/// Storage commands dispatched under [`SessionCommand::Invoke`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CommandId {
    Open = 1337,
    Store = 1338,
    Retrieve = 1339,
    Map = 1340,
    Check = 1341,
    Close = 1342,
}

impl TryFrom<u16> for CommandId {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, ()> {
        match value {
            1337 => Ok(CommandId::Open),
            1338 => Ok(CommandId::Store),
            1339 => Ok(CommandId::Retrieve),
            1340 => Ok(CommandId::Map),
            1341 => Ok(CommandId::Check),
            1342 => Ok(CommandId::Close),
            _ => Err(()),
        }
    }
}

// ── Parameter slots ───────────────────────────────────────────────────────────

/// Data-flow direction of a parameter slot, encoded in the low two bits of
/// its type nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
    InOut,
}

/// A byte range inside a message's shared buffer.
///
/// A `Region` is only a description; taking an actual slice goes through
/// [`Message::region_bytes`] / [`Message::region_bytes_mut`], which verify
/// `offset + size` against the buffer length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub offset: usize,
    pub size: usize,
}

impl Region {
    fn check(&self, available: usize) -> Result<(), ProtocolError> {
        let end = self
            .offset
            .checked_add(self.size)
            .ok_or(ProtocolError::RegionOutOfBounds {
                offset: self.offset,
                size: self.size,
                available,
            })?;
        if end > available {
            return Err(ProtocolError::RegionOutOfBounds {
                offset: self.offset,
                size: self.size,
                available,
            });
        }
        Ok(())
    }
}

/// One of the two typed parameter slots of a message.
///
/// Exactly the seven defined nibble codes are representable; an unrecognized
/// nibble is a typed decode error, never a silent fallthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSlot {
    /// Slot unused (nibble 0).
    None,
    /// Scalar in/out/in-out parameter (nibbles 1-3).
    Value { a: u64, b: u64, dir: Direction },
    /// Reference into the message's shared buffer (nibbles 5-7).
    MemRef { region: Region, dir: Direction },
}

impl ParamSlot {
    /// The 4-bit wire code for this slot.
    pub fn nibble(&self) -> u8 {
        match self {
            ParamSlot::None => 0,
            ParamSlot::Value { dir, .. } => match dir {
                Direction::Input => 1,
                Direction::Output => 2,
                Direction::InOut => 3,
            },
            ParamSlot::MemRef { dir, .. } => match dir {
                Direction::Input => 5,
                Direction::Output => 6,
                Direction::InOut => 7,
            },
        }
    }

    /// Direction of the slot, if it carries one.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            ParamSlot::None => None,
            ParamSlot::Value { dir, .. } | ParamSlot::MemRef { dir, .. } => Some(*dir),
        }
    }
}

// ── Message ───────────────────────────────────────────────────────────────────

/// One decoded (or to-be-encoded) protocol message.
///
/// The shared buffer is owned by the message and freshly allocated per
/// exchange, so output regions never expose bytes from earlier traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Raw session-command id. Kept raw so unrecognized ids pass through
    /// the service unacted upon.
    pub session_cmd: u16,
    /// Raw command id for `Invoke` messages.
    pub command: u16,
    slots: [ParamSlot; NUM_SLOTS],
    buffer: Vec<u8>,
}

impl Message {
    /// Creates a message with both slots unset and an empty shared buffer.
    pub fn new(session_cmd: u16, command: u16) -> Self {
        Self {
            session_cmd,
            command,
            slots: [ParamSlot::None; NUM_SLOTS],
            buffer: Vec::new(),
        }
    }

    pub fn slot(&self, idx: usize) -> &ParamSlot {
        &self.slots[idx]
    }

    /// The parameter-type bitmap as carried on the wire (low nibble = slot 0).
    pub fn param_types(&self) -> u16 {
        self.slots
            .iter()
            .enumerate()
            .fold(0u16, |acc, (i, s)| acc | (u16::from(s.nibble()) << (4 * i)))
    }

    /// Shared-buffer length (trailing bytes on the wire for the directions a
    /// given role transmits).
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Places a value slot.
    pub fn set_value(&mut self, idx: usize, dir: Direction, a: u64, b: u64) {
        self.slots[idx] = ParamSlot::Value { a, b, dir };
    }

    /// Appends `data` to the shared buffer and places a memref slot over it.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MessageTooLarge`] if the total serialized size would
    /// exceed [`MAX_MESSAGE_SIZE`].
    pub fn set_memref(
        &mut self,
        idx: usize,
        dir: Direction,
        data: &[u8],
    ) -> Result<(), ProtocolError> {
        let region = self.reserve(data.len())?;
        self.buffer[region.offset..region.offset + region.size].copy_from_slice(data);
        self.slots[idx] = ParamSlot::MemRef { region, dir };
        Ok(())
    }

    /// Reserves `size` zeroed bytes in the shared buffer and places an
    /// output memref slot over them (the caller side of a slot the responder
    /// will fill in).
    pub fn set_memref_reserved(
        &mut self,
        idx: usize,
        dir: Direction,
        size: usize,
    ) -> Result<(), ProtocolError> {
        let region = self.reserve(size)?;
        self.slots[idx] = ParamSlot::MemRef { region, dir };
        Ok(())
    }

    /// Used by the codec, which has already validated the size cap and
    /// filled (or zeroed) the buffer bytes.
    pub(crate) fn set_slot_raw(&mut self, idx: usize, slot: ParamSlot) {
        self.slots[idx] = slot;
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    fn reserve(&mut self, size: usize) -> Result<Region, ProtocolError> {
        let total = FIXED_SIZE
            .saturating_add(self.buffer.len())
            .saturating_add(size);
        if total > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                declared: total,
                limit: MAX_MESSAGE_SIZE,
            });
        }
        let offset = self.buffer.len();
        self.buffer.resize(offset + size, 0);
        Ok(Region { offset, size })
    }

    /// Scalar pair of a value slot.
    pub fn value(&self, idx: usize) -> Option<(u64, u64)> {
        match self.slots[idx] {
            ParamSlot::Value { a, b, .. } => Some((a, b)),
            _ => None,
        }
    }

    /// Writes the `a` word of a value slot (the success/length output of
    /// every command).
    ///
    /// # Errors
    ///
    /// [`ProtocolError::SlotTypeMismatch`] if the slot is not a value slot.
    pub fn set_value_a(&mut self, idx: usize, a: u64) -> Result<(), ProtocolError> {
        match &mut self.slots[idx] {
            ParamSlot::Value { a: slot_a, .. } => {
                *slot_a = a;
                Ok(())
            }
            _ => Err(ProtocolError::SlotTypeMismatch { slot: idx }),
        }
    }

    /// Bounds-checked view of a memref slot's bytes.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::SlotTypeMismatch`] if the slot is not a memref;
    /// [`ProtocolError::RegionOutOfBounds`] if its range exceeds the buffer.
    pub fn region_bytes(&self, idx: usize) -> Result<&[u8], ProtocolError> {
        let region = self.memref_region(idx)?;
        region.check(self.buffer.len())?;
        Ok(&self.buffer[region.offset..region.offset + region.size])
    }

    /// Bounds-checked mutable view of a memref slot's bytes.
    pub fn region_bytes_mut(&mut self, idx: usize) -> Result<&mut [u8], ProtocolError> {
        let region = self.memref_region(idx)?;
        region.check(self.buffer.len())?;
        Ok(&mut self.buffer[region.offset..region.offset + region.size])
    }

    fn memref_region(&self, idx: usize) -> Result<Region, ProtocolError> {
        match self.slots[idx] {
            ParamSlot::MemRef { region, .. } => Ok(region),
            _ => Err(ProtocolError::SlotTypeMismatch { slot: idx }),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
