//! Fixed-position, fixed-scale signals inside a CAN payload.
//!
//! Generated vehicle tables describe each signal with a [`SignalSpec`] and use
//! it from their pack/unpack functions. The physical value relates to the raw
//! field by `physical = raw * factor + offset`.
use crate::error::SignalError;
use crate::infra::codec::bits::{sign_extend, BitReader, BitWriter};

/// Placement and scaling of one signal.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SignalSpec {
    /// Offset of the least significant bit in the 64-bit payload field.
    pub start_bit: u8,
    /// Width in bits (1..=64).
    pub width: u8,
    /// Two's complement raw field.
    pub signed: bool,
    pub factor: f32,
    pub offset: f32,
}

impl SignalSpec {
    /// Unsigned signal with unit scaling.
    pub const fn unsigned(start_bit: u8, width: u8) -> Self {
        Self {
            start_bit,
            width,
            signed: false,
            factor: 1.0,
            offset: 0.0,
        }
    }

    /// Signed signal with unit scaling.
    pub const fn signed(start_bit: u8, width: u8) -> Self {
        Self {
            start_bit,
            width,
            signed: true,
            factor: 1.0,
            offset: 0.0,
        }
    }

    /// Same placement with `physical = raw * factor + offset`.
    pub const fn scaled(mut self, factor: f32, offset: f32) -> Self {
        self.factor = factor;
        self.offset = offset;
        self
    }

    /// Largest unsigned raw value the field holds.
    pub const fn raw_max(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// Signed raw range of the field.
    fn signed_range(&self) -> (i64, i64) {
        if self.width >= 64 {
            return (i64::MIN, i64::MAX);
        }
        let half = 1i64 << (self.width.saturating_sub(1));
        (-half, half - 1)
    }

    /// Store an unsigned raw value; other bits of the payload are preserved.
    pub fn pack_raw(&self, payload: &mut [u8; 8], raw: u64) -> Result<(), SignalError> {
        if raw > self.raw_max() {
            return Err(SignalError::RawOutOfRange {
                raw,
                width: self.width,
            });
        }
        let mut writer = BitWriter::at(payload, self.start_bit as usize)?;
        writer.write_u64(raw, self.width)?;
        Ok(())
    }

    pub fn unpack_raw(&self, payload: &[u8; 8]) -> Result<u64, SignalError> {
        let mut reader = BitReader::at(payload, self.start_bit as usize)?;
        Ok(reader.read_u64(self.width)?)
    }

    /// Store a two's complement raw value.
    pub fn pack_signed(&self, payload: &mut [u8; 8], raw: i64) -> Result<(), SignalError> {
        let (min, max) = self.signed_range();
        if raw < min || raw > max {
            return Err(SignalError::RawOutOfRange {
                raw: raw as u64,
                width: self.width,
            });
        }
        let mut writer = BitWriter::at(payload, self.start_bit as usize)?;
        writer.write_i64(raw, self.width)?;
        Ok(())
    }

    pub fn unpack_signed(&self, payload: &[u8; 8]) -> Result<i64, SignalError> {
        let raw = self.unpack_raw(payload)?;
        Ok(sign_extend(raw, self.width))
    }

    /// Scale a physical value and store it.
    pub fn encode(&self, payload: &mut [u8; 8], physical: f32) -> Result<(), SignalError> {
        let scaled = (physical - self.offset) / self.factor;
        if !scaled.is_finite() {
            return Err(SignalError::PhysicalOutOfRange { width: self.width });
        }
        let raw = round_half_away(scaled);
        if self.signed {
            let (min, max) = self.signed_range();
            if raw < min || raw > max {
                return Err(SignalError::PhysicalOutOfRange { width: self.width });
            }
            self.pack_signed(payload, raw)
        } else {
            if raw < 0 || raw as u64 > self.raw_max() {
                return Err(SignalError::PhysicalOutOfRange { width: self.width });
            }
            self.pack_raw(payload, raw as u64)
        }
    }

    /// Read and scale the physical value.
    pub fn decode(&self, payload: &[u8; 8]) -> Result<f32, SignalError> {
        let raw = if self.signed {
            self.unpack_signed(payload)? as f32
        } else {
            self.unpack_raw(payload)? as f32
        };
        Ok(raw * self.factor + self.offset)
    }
}

/// `f32::round` is not available in `core`.
#[inline]
fn round_half_away(value: f32) -> i64 {
    if value >= 0.0 {
        (value + 0.5) as i64
    } else {
        (value - 0.5) as i64
    }
}
