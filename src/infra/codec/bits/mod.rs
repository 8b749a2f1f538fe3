//! Bit-level access to CAN payloads.
//! Signals in the vehicle tables sit at arbitrary bit offsets of the 8-byte
//! payload, bit 0 being the least significant bit of byte 0 (Intel order).
use crate::error::{BitReaderError, BitWriterError};

/// Reader extracting bit segments from a `&[u8]` without copies.
pub struct BitReader<'a> {
    buffer: &'a [u8],
    /// Bits consumed from the beginning of `buffer`.
    bit_cursor: usize,
}

impl<'a> BitReader<'a> {
    /// Reader positioned at the start of `buffer`.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            bit_cursor: 0,
        }
    }

    /// Reader positioned at an absolute bit offset.
    pub fn at(buffer: &'a [u8], bit: usize) -> Result<Self, BitReaderError> {
        let mut reader = Self::new(buffer);
        reader.seek(bit)?;
        Ok(reader)
    }

    /// Current position in bits.
    pub fn bit_cursor(&self) -> usize {
        self.bit_cursor
    }

    /// Move the cursor to an absolute bit offset.
    pub fn seek(&mut self, bit: usize) -> Result<(), BitReaderError> {
        let len_bits = self.buffer.len() * 8;
        if bit > len_bits {
            return Err(BitReaderError::OutOfBounds {
                asked: bit,
                available: len_bits,
            });
        }
        self.bit_cursor = bit;
        Ok(())
    }

    /// Read `num_bits` (1..=64) bits at the cursor.
    pub fn read_u64(&mut self, num_bits: u8) -> Result<u64, BitReaderError> {
        if !(1..=64).contains(&num_bits) {
            return Err(BitReaderError::TooLongForType {
                max: 64,
                asked: num_bits,
            });
        }

        let len_bits = self.buffer.len() * 8;
        if self.bit_cursor + num_bits as usize > len_bits {
            return Err(BitReaderError::OutOfBounds {
                asked: num_bits as usize,
                available: len_bits - self.bit_cursor,
            });
        }

        let mut result: u64 = 0;
        let mut done = 0usize;
        while done < num_bits as usize {
            let position = self.bit_cursor + done;
            let offset = position % 8;
            let chunk = (8 - offset).min(num_bits as usize - done);
            let mask = ((1u16 << chunk) - 1) as u8;
            let bits = (self.buffer[position / 8] >> offset) & mask;
            result |= (bits as u64) << done;
            done += chunk;
        }
        self.bit_cursor += num_bits as usize;
        Ok(result)
    }

    /// Read `num_bits` bits and sign-extend them as two's complement.
    pub fn read_i64(&mut self, num_bits: u8) -> Result<i64, BitReaderError> {
        let raw = self.read_u64(num_bits)?;
        Ok(sign_extend(raw, num_bits))
    }
}

/// Two's complement sign extension of the low `num_bits` bits of `raw`.
#[inline]
pub fn sign_extend(raw: u64, num_bits: u8) -> i64 {
    if num_bits == 0 || num_bits >= 64 {
        return raw as i64;
    }
    let shift = 64 - num_bits as u32;
    ((raw << shift) as i64) >> shift
}

//==================================================================================BITWRITER
/// Writer laying bit segments into a `&mut [u8]`, leaving the surrounding
/// bits untouched so several signals can share one payload.
pub struct BitWriter<'a> {
    buffer: &'a mut [u8],
    bit_cursor: usize,
}

impl<'a> BitWriter<'a> {
    /// Writer positioned at the start of `buffer`.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            bit_cursor: 0,
        }
    }

    /// Writer positioned at an absolute bit offset.
    pub fn at(buffer: &'a mut [u8], bit: usize) -> Result<Self, BitWriterError> {
        let mut writer = Self::new(buffer);
        writer.seek(bit)?;
        Ok(writer)
    }

    pub fn bit_cursor(&self) -> usize {
        self.bit_cursor
    }

    /// Move the cursor to an absolute bit offset.
    pub fn seek(&mut self, bit: usize) -> Result<(), BitWriterError> {
        let len_bits = self.buffer.len() * 8;
        if bit > len_bits {
            return Err(BitWriterError::OutOfBounds {
                asked: bit,
                available: len_bits,
            });
        }
        self.bit_cursor = bit;
        Ok(())
    }

    /// Write the low `num_bits` (1..=64) bits of `value` at the cursor.
    pub fn write_u64(&mut self, value: u64, num_bits: u8) -> Result<(), BitWriterError> {
        if !(1..=64).contains(&num_bits) {
            return Err(BitWriterError::TooLongForType {
                max: 64,
                asked: num_bits,
            });
        }

        let len_bits = self.buffer.len() * 8;
        if self.bit_cursor + num_bits as usize > len_bits {
            return Err(BitWriterError::OutOfBounds {
                asked: num_bits as usize,
                available: len_bits - self.bit_cursor,
            });
        }

        let mut remaining = value;
        let mut done = 0usize;
        while done < num_bits as usize {
            let position = self.bit_cursor + done;
            let offset = position % 8;
            let chunk = (8 - offset).min(num_bits as usize - done);
            let mask = ((1u16 << chunk) - 1) as u8;
            let byte = &mut self.buffer[position / 8];
            *byte &= !(mask << offset);
            *byte |= (remaining as u8 & mask) << offset;
            remaining >>= chunk;
            done += chunk;
        }

        self.bit_cursor += num_bits as usize;
        Ok(())
    }

    /// Write a two's complement value truncated to `num_bits`.
    pub fn write_i64(&mut self, value: i64, num_bits: u8) -> Result<(), BitWriterError> {
        self.write_u64(value as u64, num_bits)
    }
}
