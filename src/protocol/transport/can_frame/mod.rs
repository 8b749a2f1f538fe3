//! In-memory representation of a classic CAN frame as it is moved between the
//! mailboxes, the receive FIFOs and the protocol layers.
use embedded_can::{ExtendedId, Frame, Id, StandardId};

/// Maximum payload of a classic CAN frame.
pub const MAX_FRAME_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Raw CAN frame.
pub struct CanFrame {
    /// 11-bit or 29-bit identifier.
    pub id: Id,
    /// Remote transmission request.
    pub remote: bool,
    /// Payload buffer. Bytes past `len` are zero for frames built by this crate.
    pub data: [u8; MAX_FRAME_LEN],
    /// Number of valid payload bytes (Data Length Code, 0 to 8).
    pub len: usize,
}

impl CanFrame {
    /// Build a data frame; `data` longer than eight bytes is rejected.
    pub fn data_frame(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_FRAME_LEN {
            return None;
        }
        let mut buffer = [0u8; MAX_FRAME_LEN];
        buffer[..data.len()].copy_from_slice(data);
        Some(Self {
            id: id.into(),
            remote: false,
            data: buffer,
            len: data.len(),
        })
    }

    /// Build a data frame from a full payload and a length, clamped to eight.
    pub fn from_payload(id: Id, data: [u8; MAX_FRAME_LEN], len: usize) -> Self {
        Self {
            id,
            remote: false,
            data,
            len: len.min(MAX_FRAME_LEN),
        }
    }

    /// Payload viewed as the 64-bit little-endian field used for signal packing.
    #[inline]
    pub fn payload_u64(&self) -> u64 {
        u64::from_le_bytes(self.data)
    }

    /// Valid payload bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Numeric identifier without the standard/extended distinction.
    #[inline]
    pub fn raw_id(&self) -> u32 {
        raw_id(self.id)
    }
}

/// Numeric value of an identifier.
#[inline]
pub fn raw_id(id: Id) -> u32 {
    match id {
        Id::Standard(id) => id.as_raw() as u32,
        Id::Extended(id) => id.as_raw(),
    }
}

impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Self::data_frame(id, data)
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_FRAME_LEN {
            return None;
        }
        Some(Self {
            id: id.into(),
            remote: true,
            data: [0; MAX_FRAME_LEN],
            len: dlc,
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.len
    }

    fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            self.bytes()
        }
    }
}

//==================================================================================MESSAGE_ID
/// Identifier stored in configuration tables. Unlike [`Id`] it can be built in
/// `const` context from a raw number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MessageId {
    raw: u32,
    extended: bool,
}

impl MessageId {
    /// 11-bit identifier; higher bits are masked off.
    pub const fn standard(raw: u16) -> Self {
        Self {
            raw: (raw & 0x7FF) as u32,
            extended: false,
        }
    }

    /// 29-bit identifier; higher bits are masked off.
    pub const fn extended(raw: u32) -> Self {
        Self {
            raw: raw & 0x1FFF_FFFF,
            extended: true,
        }
    }

    pub const fn raw(&self) -> u32 {
        self.raw
    }

    pub const fn is_extended(&self) -> bool {
        self.extended
    }

    /// Convert into the `embedded-can` identifier.
    pub fn to_id(self) -> Id {
        if self.extended {
            Id::Extended(ExtendedId::new(self.raw).unwrap_or(ExtendedId::ZERO))
        } else {
            Id::Standard(StandardId::new(self.raw as u16).unwrap_or(StandardId::ZERO))
        }
    }

    /// Whether `id` designates this message.
    pub fn matches(&self, id: Id) -> bool {
        match id {
            Id::Standard(id) => !self.extended && id.as_raw() as u32 == self.raw,
            Id::Extended(id) => self.extended && id.as_raw() == self.raw,
        }
    }
}

impl From<MessageId> for Id {
    fn from(value: MessageId) -> Self {
        value.to_id()
    }
}
